//! Persistence for collaboratively edited documents.
//!
//! A document is a single row holding the latest merged CRDT snapshot and a
//! version counter; every successful update also appends one record to the
//! document's update log at `clock = new version`. Both backends serialize
//! writers per document and never lock across documents.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SyncError;

pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

/// The stored state of one document.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DocumentSnapshot {
	pub id: String,
	/// Opaque CRDT snapshot, never interpreted here.
	pub state: Vec<u8>,
	pub version: i64,
	pub updated_at: DateTime<Utc>,
}

/// One entry of a document's update log.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UpdateRecord {
	pub document_id: String,
	/// Document version produced by this update.
	pub clock: i64,
	pub payload: Vec<u8>,
	pub created_at: DateTime<Utc>,
}

/// Result of `initialize`: the row that exists now, and whether this call
/// created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
	pub snapshot: DocumentSnapshot,
	pub created: bool,
}

/// Storage contract shared by the Postgres and in-memory backends.
///
/// Mutations on one document are serialized by a per-document lock (a row
/// lock in Postgres). Reads never take that lock.
#[async_trait]
pub trait DocumentRepo: Send + Sync + 'static {
	/// Point read of the full document row.
	async fn get_document(&self, id: &str) -> Result<Option<DocumentSnapshot>, SyncError>;

	/// Latest snapshot, or `None` for a document that was never initialized.
	async fn get_state(&self, id: &str) -> Result<Option<Vec<u8>>, SyncError> {
		Ok(self.get_document(id).await?.map(|doc| doc.state))
	}

	/// Stored version; uninitialized documents are version 0.
	async fn get_version(&self, id: &str) -> Result<i64, SyncError> {
		Ok(self.get_document(id).await?.map_or(0, |doc| doc.version))
	}

	/// Insert the document at version 0 unless it already exists. The first
	/// writer wins; later callers get the existing row back unchanged.
	async fn initialize(&self, id: &str, initial_state: &[u8]) -> Result<InitOutcome, SyncError>;

	/// Replace the state, bump the version by one and log `update` at the new
	/// clock, all or nothing. With `expected_version` set, the call fails with
	/// `VersionConflict` unless the stored version equals it. Returns the new
	/// version.
	async fn apply_update(
		&self,
		id: &str,
		update: &[u8],
		new_state: &[u8],
		expected_version: Option<i64>,
	) -> Result<i64, SyncError>;

	/// Overwrite the state without touching the version or the update log.
	///
	/// Last write wins: an Apply that commits just before this call is
	/// silently undone in the snapshot, although its log record survives.
	async fn replace_state(&self, id: &str, new_state: &[u8]) -> Result<(), SyncError>;

	/// Log records created strictly after `since`, ordered by clock.
	async fn list_updates_since(
		&self,
		id: &str,
		since: DateTime<Utc>,
	) -> Result<Vec<UpdateRecord>, SyncError>;

	/// Log records with a clock strictly greater than `clock`, ordered by clock.
	async fn list_updates_after(
		&self,
		id: &str,
		clock: i64,
	) -> Result<Vec<UpdateRecord>, SyncError>;

	/// Number of records in the document's update log; 0 when absent.
	async fn count_updates(&self, id: &str) -> Result<i64, SyncError>;

	/// Remove the document and its whole update log. Returns whether a
	/// document existed.
	async fn delete(&self, id: &str) -> Result<bool, SyncError>;

	/// Lightweight check that the backend is reachable.
	async fn ping(&self) -> Result<(), SyncError>;
}

//! Quire sync: persistence and concurrency control for collaboratively
//! edited notes.
//!
//! Clients merge CRDT changes locally and hand the server two opaque blobs per
//! edit: the incremental update and the resulting full state. The server keeps
//! the latest state with a version counter and an append-only log of updates,
//! and guarantees that two writers racing on the same base version cannot both
//! win.

pub mod config;
pub mod error;
pub mod observability;
pub mod store;
pub mod sync;

use std::sync::Arc;

pub use error::SyncError;
pub use store::{DocumentRepo, DocumentSnapshot, InitOutcome, UpdateRecord};
pub use sync::{Edit, RetryPolicy, SyncService};

use crate::config::Settings;
use crate::observability::MetricsRegistry;
use crate::store::PgDocumentStore;

/// Connect to Postgres, bring the schema up to date and wrap the store in a
/// [`SyncService`] configured from `settings`.
pub async fn connect(
	settings: &Settings,
	metrics: Arc<MetricsRegistry>,
) -> Result<SyncService, SyncError> {
	let store = PgDocumentStore::connect(settings).await?;
	store.migrate().await?;
	tracing::info!(
		max_connections = settings.max_connections,
		lock_timeout_ms = settings.lock_timeout_ms,
		"connected to document store"
	);
	Ok(SyncService::new(Arc::new(store), metrics)
		.with_retry_policy(RetryPolicy::from_settings(settings)))
}

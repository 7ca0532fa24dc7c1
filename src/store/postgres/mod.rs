//! PostgreSQL backend.
//!
//! Every mutation runs in its own transaction. Apply, Replace and Delete take
//! the document's row lock (`SELECT .. FOR UPDATE` or an UPDATE) before
//! writing, which is what serializes concurrent writers on one document. The
//! `WHERE version = $v` guard on the state update is an internal consistency
//! check on top of that lock, not the mechanism itself. Initialize waits on
//! the same row while another transaction inserts or deletes it.

mod documents;
mod update_log;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, warn};

use crate::config::Settings;
use crate::error::SyncError;
use crate::store::{DocumentRepo, DocumentSnapshot, InitOutcome, UpdateRecord};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Document store backed by the `sync_documents` and `sync_updates` tables.
#[derive(Clone)]
pub struct PgDocumentStore {
	pool: PgPool,
	lock_timeout_ms: u64,
}

impl PgDocumentStore {
	/// Wrap an existing pool. Row lock waits are unbounded until
	/// `with_lock_timeout` is set.
	pub fn new(pool: PgPool) -> Self {
		Self {
			pool,
			lock_timeout_ms: 0,
		}
	}

	/// Abort mutations that wait longer than `ms` for a row lock. 0 waits forever.
	pub fn with_lock_timeout(mut self, ms: u64) -> Self {
		self.lock_timeout_ms = ms;
		self
	}

	/// Build a pool from the configured database URL and limits.
	pub async fn connect(settings: &Settings) -> Result<Self, SyncError> {
		let pool = PgPoolOptions::new()
			.max_connections(settings.max_connections)
			.acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
			.connect(settings.database_url.as_str())
			.await?;
		Ok(Self::new(pool).with_lock_timeout(settings.lock_timeout_ms))
	}

	/// Apply the embedded schema migrations.
	pub async fn migrate(&self) -> Result<(), SyncError> {
		MIGRATOR.run(&self.pool).await?;
		Ok(())
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}

	/// Open a transaction with the configured lock timeout scoped to it.
	async fn begin(&self) -> Result<Transaction<'static, Postgres>, SyncError> {
		let mut tx = self.pool.begin().await?;
		if self.lock_timeout_ms > 0 {
			sqlx::query("SELECT set_config('lock_timeout', $1, true)")
				.bind(format!("{}ms", self.lock_timeout_ms))
				.execute(&mut *tx)
				.await?;
		}
		Ok(tx)
	}
}

#[async_trait]
impl DocumentRepo for PgDocumentStore {
	async fn get_document(&self, id: &str) -> Result<Option<DocumentSnapshot>, SyncError> {
		let mut conn = self.pool.acquire().await?;
		Ok(documents::fetch(&mut conn, id).await?)
	}

	async fn get_version(&self, id: &str) -> Result<i64, SyncError> {
		let mut conn = self.pool.acquire().await?;
		Ok(documents::version(&mut conn, id).await?.unwrap_or(0))
	}

	#[tracing::instrument(skip_all, fields(document_id = %id))]
	async fn initialize(&self, id: &str, initial_state: &[u8]) -> Result<InitOutcome, SyncError> {
		let mut tx = self.begin().await?;
		// A concurrent uncommitted insert of the same id makes this wait; once
		// it commits the conflict is ignored and the read below sees its row.
		// The same wait applies to an uncommitted delete of the id.
		let created = documents::insert_if_absent(&mut tx, id, initial_state)
			.await
			.map_err(|e| SyncError::from_lock_wait(id, e))?;
		let snapshot = documents::fetch(&mut tx, id)
			.await?
			.ok_or_else(|| SyncError::NotFound(id.to_string()))?;
		tx.commit().await?;
		debug!(created, version = snapshot.version, "document initialized");
		Ok(InitOutcome { snapshot, created })
	}

	#[tracing::instrument(skip_all, fields(document_id = %id, update_len = update.len()))]
	async fn apply_update(
		&self,
		id: &str,
		update: &[u8],
		new_state: &[u8],
		expected_version: Option<i64>,
	) -> Result<i64, SyncError> {
		let mut tx = self.begin().await?;

		let current = documents::lock_version(&mut tx, id)
			.await
			.map_err(|e| SyncError::from_lock_wait(id, e))?
			.ok_or_else(|| SyncError::NotFound(id.to_string()))?;

		if let Some(expected) = expected_version {
			if expected != current {
				return Err(SyncError::VersionConflict {
					document_id: id.to_string(),
					expected,
					actual: current,
				});
			}
		}

		if !documents::advance(&mut tx, id, current, new_state).await? {
			// Only reachable if the row lock above did not hold.
			warn!(version = current, "conditional update matched no rows under row lock");
			return Err(match documents::version(&mut tx, id).await? {
				Some(actual) => SyncError::VersionConflict {
					document_id: id.to_string(),
					expected: current,
					actual,
				},
				None => SyncError::NotFound(id.to_string()),
			});
		}

		let clock = current + 1;
		if !update_log::append(&mut tx, id, clock, update).await? {
			error!(clock, "update log already contains this clock; rolling back");
			return Err(SyncError::DuplicateClock {
				document_id: id.to_string(),
				clock,
			});
		}

		tx.commit().await?;
		Ok(clock)
	}

	#[tracing::instrument(skip_all, fields(document_id = %id))]
	async fn replace_state(&self, id: &str, new_state: &[u8]) -> Result<(), SyncError> {
		let mut tx = self.begin().await?;
		let found = documents::overwrite_state(&mut tx, id, new_state)
			.await
			.map_err(|e| SyncError::from_lock_wait(id, e))?;
		if !found {
			return Err(SyncError::NotFound(id.to_string()));
		}
		tx.commit().await?;
		Ok(())
	}

	async fn list_updates_since(
		&self,
		id: &str,
		since: DateTime<Utc>,
	) -> Result<Vec<UpdateRecord>, SyncError> {
		let mut conn = self.pool.acquire().await?;
		Ok(update_log::list_since(&mut conn, id, since).await?)
	}

	async fn list_updates_after(
		&self,
		id: &str,
		clock: i64,
	) -> Result<Vec<UpdateRecord>, SyncError> {
		let mut conn = self.pool.acquire().await?;
		Ok(update_log::list_after_clock(&mut conn, id, clock).await?)
	}

	async fn count_updates(&self, id: &str) -> Result<i64, SyncError> {
		let mut conn = self.pool.acquire().await?;
		Ok(update_log::count(&mut conn, id).await?)
	}

	#[tracing::instrument(skip_all, fields(document_id = %id))]
	async fn delete(&self, id: &str) -> Result<bool, SyncError> {
		let mut tx = self.begin().await?;

		// Lock first so an in-flight Apply cannot log a record after the purge.
		let exists = documents::lock_version(&mut tx, id)
			.await
			.map_err(|e| SyncError::from_lock_wait(id, e))?
			.is_some();
		if !exists {
			return Ok(false);
		}

		let purged = update_log::purge(&mut tx, id).await?;
		let removed = documents::remove(&mut tx, id).await?;
		tx.commit().await?;
		debug!(purged, "document deleted");
		Ok(removed)
	}

	async fn ping(&self) -> Result<(), SyncError> {
		sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
		Ok(())
	}
}

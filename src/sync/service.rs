use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::observability::MetricsRegistry;
use crate::store::{DocumentRepo, DocumentSnapshot, InitOutcome, UpdateRecord};
use crate::sync::RetryPolicy;

/// An edit rebased onto a specific document snapshot: the opaque update to
/// log and the merged state that results from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
	pub update: Vec<u8>,
	pub state: Vec<u8>,
}

/// The synchronization API used by the request layer.
///
/// Thin over a [`DocumentRepo`]: it adds logging, metrics and the
/// rebase-and-retry loop, but all atomicity and locking live in the store.
#[derive(Clone)]
pub struct SyncService {
	repo: Arc<dyn DocumentRepo>,
	metrics: Arc<MetricsRegistry>,
	retry: RetryPolicy,
}

impl SyncService {
	pub fn new(repo: Arc<dyn DocumentRepo>, metrics: Arc<MetricsRegistry>) -> Self {
		Self {
			repo,
			metrics,
			retry: RetryPolicy::default(),
		}
	}

	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}

	pub fn metrics(&self) -> &Arc<MetricsRegistry> {
		&self.metrics
	}

	pub async fn get_state(&self, id: &str) -> Result<Option<Vec<u8>>, SyncError> {
		self.repo.get_state(id).await
	}

	pub async fn get_document(&self, id: &str) -> Result<Option<DocumentSnapshot>, SyncError> {
		self.repo.get_document(id).await
	}

	pub async fn get_version(&self, id: &str) -> Result<i64, SyncError> {
		self.repo.get_version(id).await
	}

	/// Idempotent; never overwrites an existing document.
	pub async fn initialize_document(
		&self,
		id: &str,
		initial_state: &[u8],
	) -> Result<InitOutcome, SyncError> {
		self.metrics.init_requests_total.inc();
		let outcome = self.repo.initialize(id, initial_state).await?;
		if outcome.created {
			self.metrics.documents_created_total.inc();
			info!(document_id = id, "created collaborative document");
		}
		Ok(outcome)
	}

	/// Apply one update. Pass the version the edit was computed against as
	/// `expected_version` to be told about concurrent writers instead of
	/// overwriting them.
	pub async fn apply_update(
		&self,
		id: &str,
		update: &[u8],
		new_state: &[u8],
		expected_version: Option<i64>,
	) -> Result<i64, SyncError> {
		let start = Instant::now();
		let res = self
			.repo
			.apply_update(id, update, new_state, expected_version)
			.await;
		self.metrics
			.apply_duration_seconds
			.observe(start.elapsed().as_secs_f64());
		self.record_apply(id, &res);
		res
	}

	/// Read the current snapshot, let `rebase` produce an edit on top of it and
	/// apply that edit against the snapshot's version. On a conflict or a lock
	/// timeout the snapshot is re-read and `rebase` called again, up to the
	/// configured number of retries.
	pub async fn apply_with_rebase<F>(&self, id: &str, mut rebase: F) -> Result<i64, SyncError>
	where
		F: FnMut(&DocumentSnapshot) -> Edit + Send,
	{
		let mut retry = 0;
		loop {
			let snapshot = self
				.repo
				.get_document(id)
				.await?
				.ok_or_else(|| SyncError::NotFound(id.to_string()))?;
			let edit = rebase(&snapshot);

			match self
				.apply_update(id, &edit.update, &edit.state, Some(snapshot.version))
				.await
			{
				Ok(version) => return Ok(version),
				Err(e) if e.is_retryable() && retry < self.retry.max_retries => {
					retry += 1;
					self.metrics.apply_retries_total.inc();
					let delay = self.retry.backoff(retry);
					debug!(
						document_id = id,
						retry,
						max_retries = self.retry.max_retries,
						?delay,
						"retrying apply after {}",
						e
					);
					sleep(delay).await;
				}
				Err(e) => return Err(e),
			}
		}
	}

	/// Overwrite the state without consuming a version or logging an update.
	///
	/// Last write wins. Meant for compaction and full resync; a concurrent
	/// Apply that commits first is undone in the snapshot.
	pub async fn replace_state(&self, id: &str, new_state: &[u8]) -> Result<(), SyncError> {
		self.repo.replace_state(id, new_state).await?;
		self.metrics.state_replacements_total.inc();
		warn!(
			document_id = id,
			state_len = new_state.len(),
			"document state replaced outside the versioned update path"
		);
		Ok(())
	}

	pub async fn list_updates_since(
		&self,
		id: &str,
		since: DateTime<Utc>,
	) -> Result<Vec<UpdateRecord>, SyncError> {
		self.repo.list_updates_since(id, since).await
	}

	pub async fn list_updates_after(
		&self,
		id: &str,
		clock: i64,
	) -> Result<Vec<UpdateRecord>, SyncError> {
		self.repo.list_updates_after(id, clock).await
	}

	pub async fn count_updates(&self, id: &str) -> Result<i64, SyncError> {
		self.repo.count_updates(id).await
	}

	pub async fn delete_document(&self, id: &str) -> Result<bool, SyncError> {
		let existed = self.repo.delete(id).await?;
		if existed {
			self.metrics.documents_deleted_total.inc();
			info!(document_id = id, "deleted collaborative document");
		}
		Ok(existed)
	}

	pub async fn ping(&self) -> Result<(), SyncError> {
		self.repo.ping().await
	}

	fn record_apply(&self, id: &str, res: &Result<i64, SyncError>) {
		match res {
			Ok(version) => {
				self.metrics.updates_applied_total.inc();
				debug!(document_id = id, version, "update applied");
			}
			Err(SyncError::VersionConflict {
				expected, actual, ..
			}) => {
				self.metrics.version_conflicts_total.inc();
				debug!(document_id = id, expected, actual, "version conflict");
			}
			Err(SyncError::LockTimeout(_)) => {
				self.metrics.lock_timeouts_total.inc();
				warn!(document_id = id, "timed out waiting for document row lock");
			}
			Err(SyncError::DuplicateClock { clock, .. }) => {
				self.metrics.duplicate_clocks_total.inc();
				error!(
					document_id = id,
					clock,
					"update log and document version disagree; manual repair required"
				);
			}
			Err(e) => {
				self.metrics.apply_failures_total.inc();
				warn!(document_id = id, "apply failed: {}", e);
			}
		}
	}
}

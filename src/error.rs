use thiserror::Error;

/// SQLSTATE raised by Postgres when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Errors returned by the document store and the sync service.
///
/// `VersionConflict` is the only routine failure: the caller re-reads the
/// document, rebases its edit and retries. `DuplicateClock` means the update
/// log and the version counter disagree and must never be retried blindly.
#[derive(Debug, Error)]
pub enum SyncError {
	#[error("document '{0}' not found")]
	NotFound(String),

	#[error("version conflict on document '{document_id}': expected {expected}, found {actual}")]
	VersionConflict {
		document_id: String,
		expected: i64,
		actual: i64,
	},

	#[error("update log already holds clock {clock} for document '{document_id}'")]
	DuplicateClock { document_id: String, clock: i64 },

	#[error("timed out waiting for the row lock on document '{0}'")]
	LockTimeout(String),

	#[error("storage error: {0}")]
	Storage(#[from] sqlx::Error),

	#[error("migration error: {0}")]
	Migration(#[from] sqlx::migrate::MigrateError),
}

impl SyncError {
	/// True for the routine "someone else got there first" failure.
	pub fn is_conflict(&self) -> bool {
		matches!(self, SyncError::VersionConflict { .. })
	}

	/// Whether retrying the whole operation can succeed without operator
	/// intervention.
	pub fn is_retryable(&self) -> bool {
		match self {
			SyncError::VersionConflict { .. } | SyncError::LockTimeout(_) => true,
			SyncError::Storage(e) => matches!(
				e,
				sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
			),
			_ => false,
		}
	}

	/// Map an error raised while waiting on a document row lock, turning an
	/// expired `lock_timeout` into `LockTimeout`.
	pub(crate) fn from_lock_wait(document_id: &str, err: sqlx::Error) -> Self {
		let timed_out = err
			.as_database_error()
			.and_then(|db| db.code())
			.is_some_and(|code| code == LOCK_NOT_AVAILABLE);
		if timed_out {
			SyncError::LockTimeout(document_id.to_string())
		} else {
			SyncError::Storage(err)
		}
	}
}

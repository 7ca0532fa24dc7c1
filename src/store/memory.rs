//! In-process backend with the same contract as the Postgres store.
//!
//! Each document lives in its own slot behind a `tokio::sync::Mutex`, which
//! plays the role of the row lock. The map of slots is only held long enough
//! to find, create or drop a slot, and never while waiting on a slot lock, so
//! work on one document never stalls another. A slot that was dropped from the
//! map is dead: whoever locks it afterwards must look it up again.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error};

use crate::error::SyncError;
use crate::store::{DocumentRepo, DocumentSnapshot, InitOutcome, UpdateRecord};

#[derive(Default)]
struct Slot {
	/// `None` once the document is deleted; the slot is dropped from the map
	/// right after unless it is in use or was re-initialized in between.
	row: Option<DocumentSnapshot>,
	/// Ordered by clock.
	log: Vec<UpdateRecord>,
}

#[derive(Default)]
pub struct MemoryDocumentStore {
	slots: RwLock<HashMap<String, Arc<Mutex<Slot>>>>,
}

impl MemoryDocumentStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of live documents.
	pub async fn len(&self) -> usize {
		let slots: Vec<_> = self.slots.read().await.values().cloned().collect();
		let mut live = 0;
		for slot in slots {
			if slot.lock().await.row.is_some() {
				live += 1;
			}
		}
		live
	}

	pub async fn is_empty(&self) -> bool {
		self.len().await == 0
	}

	async fn slot(&self, id: &str) -> Option<Arc<Mutex<Slot>>> {
		self.slots.read().await.get(id).cloned()
	}

	async fn is_current(&self, id: &str, slot: &Arc<Mutex<Slot>>) -> bool {
		self.slots
			.read()
			.await
			.get(id)
			.is_some_and(|current| Arc::ptr_eq(current, slot))
	}
}

#[async_trait]
impl DocumentRepo for MemoryDocumentStore {
	async fn get_document(&self, id: &str) -> Result<Option<DocumentSnapshot>, SyncError> {
		let Some(slot) = self.slot(id).await else {
			return Ok(None);
		};
		let slot = slot.lock().await;
		Ok(slot.row.clone())
	}

	#[tracing::instrument(skip_all, fields(document_id = %id))]
	async fn initialize(&self, id: &str, initial_state: &[u8]) -> Result<InitOutcome, SyncError> {
		loop {
			let slot = self
				.slots
				.write()
				.await
				.entry(id.to_string())
				.or_default()
				.clone();
			let mut guard = slot.lock().await;

			// A delete may have dropped this slot while we waited for it.
			if !self.is_current(id, &slot).await {
				continue;
			}

			if let Some(existing) = &guard.row {
				return Ok(InitOutcome {
					snapshot: existing.clone(),
					created: false,
				});
			}

			let snapshot = DocumentSnapshot {
				id: id.to_string(),
				state: initial_state.to_vec(),
				version: 0,
				updated_at: Utc::now(),
			};
			guard.row = Some(snapshot.clone());
			guard.log.clear();
			debug!("document initialized");
			return Ok(InitOutcome {
				snapshot,
				created: true,
			});
		}
	}

	#[tracing::instrument(skip_all, fields(document_id = %id, update_len = update.len()))]
	async fn apply_update(
		&self,
		id: &str,
		update: &[u8],
		new_state: &[u8],
		expected_version: Option<i64>,
	) -> Result<i64, SyncError> {
		let slot = self
			.slot(id)
			.await
			.ok_or_else(|| SyncError::NotFound(id.to_string()))?;
		let mut slot = slot.lock().await;
		let Slot { row, log } = &mut *slot;
		let row = row
			.as_mut()
			.ok_or_else(|| SyncError::NotFound(id.to_string()))?;

		let current = row.version;
		if let Some(expected) = expected_version {
			if expected != current {
				return Err(SyncError::VersionConflict {
					document_id: id.to_string(),
					expected,
					actual: current,
				});
			}
		}

		// Validate everything before touching the slot so a failure leaves
		// both the row and the log as they were. The log is ordered by clock,
		// so only its tail can collide.
		let clock = current + 1;
		if log.last().is_some_and(|r| r.clock >= clock) {
			error!(clock, "update log already contains this clock; rejecting update");
			return Err(SyncError::DuplicateClock {
				document_id: id.to_string(),
				clock,
			});
		}

		let now = Utc::now();
		log.push(UpdateRecord {
			document_id: id.to_string(),
			clock,
			payload: update.to_vec(),
			created_at: now,
		});
		row.state = new_state.to_vec();
		row.version = clock;
		row.updated_at = now;
		Ok(clock)
	}

	async fn replace_state(&self, id: &str, new_state: &[u8]) -> Result<(), SyncError> {
		let slot = self
			.slot(id)
			.await
			.ok_or_else(|| SyncError::NotFound(id.to_string()))?;
		let mut slot = slot.lock().await;
		let row = slot
			.row
			.as_mut()
			.ok_or_else(|| SyncError::NotFound(id.to_string()))?;
		row.state = new_state.to_vec();
		row.updated_at = Utc::now();
		Ok(())
	}

	async fn list_updates_since(
		&self,
		id: &str,
		since: DateTime<Utc>,
	) -> Result<Vec<UpdateRecord>, SyncError> {
		let Some(slot) = self.slot(id).await else {
			return Ok(Vec::new());
		};
		let slot = slot.lock().await;
		Ok(slot
			.log
			.iter()
			.filter(|r| r.created_at > since)
			.cloned()
			.collect())
	}

	async fn list_updates_after(
		&self,
		id: &str,
		clock: i64,
	) -> Result<Vec<UpdateRecord>, SyncError> {
		let Some(slot) = self.slot(id).await else {
			return Ok(Vec::new());
		};
		let slot = slot.lock().await;
		Ok(slot
			.log
			.iter()
			.filter(|r| r.clock > clock)
			.cloned()
			.collect())
	}

	async fn count_updates(&self, id: &str) -> Result<i64, SyncError> {
		let Some(slot) = self.slot(id).await else {
			return Ok(0);
		};
		let len = slot.lock().await.log.len();
		Ok(i64::try_from(len).unwrap_or(i64::MAX))
	}

	#[tracing::instrument(skip_all, fields(document_id = %id))]
	async fn delete(&self, id: &str) -> Result<bool, SyncError> {
		let Some(slot) = self.slot(id).await else {
			return Ok(false);
		};

		let existed = {
			let mut guard = slot.lock().await;
			guard.log.clear();
			guard.row.take().is_some()
		};

		// Drop the emptied slot unless someone is using it right now. A busy
		// slot stays in the map and is simply reused by the next initializer.
		let mut slots = self.slots.write().await;
		let stale = slots.get(id).is_some_and(|current| {
			Arc::ptr_eq(current, &slot)
				&& current.try_lock().is_ok_and(|guard| guard.row.is_none())
		});
		if stale {
			slots.remove(id);
		}
		Ok(existed)
	}

	async fn ping(&self) -> Result<(), SyncError> {
		Ok(())
	}
}

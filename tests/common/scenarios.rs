//! Behaviour every storage backend must show, driven through `SyncService`.
//! Each scenario takes a fresh id prefix so runs against a shared database do
//! not interfere.

use std::collections::BTreeSet;

use chrono::{Duration as ChronoDuration, Utc};
use quire_sync::{Edit, SyncError, SyncService};
use tokio::task::JoinSet;
use tokio::time::{Duration, sleep};

use super::unique_id;

fn clocks(records: &[quire_sync::UpdateRecord]) -> Vec<i64> {
	records.iter().map(|r| r.clock).collect()
}

pub async fn initialize_is_first_writer_wins(svc: &SyncService) {
	let id = unique_id("init");

	let first = svc.initialize_document(&id, b"A").await.expect("first init");
	assert!(first.created);
	assert_eq!(first.snapshot.version, 0);

	let second = svc.initialize_document(&id, b"B").await.expect("second init");
	assert!(!second.created);
	assert_eq!(second.snapshot.state, b"A");
	assert_eq!(second.snapshot.version, 0);

	assert_eq!(svc.get_state(&id).await.unwrap().unwrap(), b"A");
	assert_eq!(svc.get_version(&id).await.unwrap(), 0);
}

pub async fn concurrent_initializers_converge(svc: &SyncService, racers: usize) {
	let id = unique_id("init-race");
	let mut set = JoinSet::new();
	for i in 0..racers {
		let svc = svc.clone();
		let id = id.clone();
		set.spawn(async move {
			let state = format!("S{i}").into_bytes();
			svc.initialize_document(&id, &state).await
		});
	}

	let mut created = 0;
	let mut seen = BTreeSet::new();
	while let Some(res) = set.join_next().await {
		let outcome = res.expect("task").expect("init never fails");
		if outcome.created {
			created += 1;
		}
		seen.insert(outcome.snapshot.state);
	}
	assert_eq!(created, 1);
	assert_eq!(seen.len(), 1, "all callers observe the same row");
	assert_eq!(
		&svc.get_state(&id).await.unwrap().unwrap(),
		seen.first().unwrap()
	);
}

pub async fn versions_advance_by_one(svc: &SyncService, n: i64) {
	let id = unique_id("mono");
	svc.initialize_document(&id, b"S0").await.unwrap();

	for i in 1..=n {
		let v = svc
			.apply_update(&id, format!("U{i}").as_bytes(), format!("S{i}").as_bytes(), None)
			.await
			.expect("apply");
		assert_eq!(v, i);
	}

	assert_eq!(svc.get_version(&id).await.unwrap(), n);
	assert_eq!(
		svc.get_state(&id).await.unwrap().unwrap(),
		format!("S{n}").into_bytes()
	);

	let log = svc.list_updates_after(&id, 0).await.unwrap();
	assert_eq!(clocks(&log), (1..=n).collect::<Vec<_>>());
	for r in &log {
		assert_eq!(r.document_id, id);
		assert_eq!(r.payload, format!("U{}", r.clock).into_bytes());
	}

	let tail = svc.list_updates_after(&id, n - 1).await.unwrap();
	assert_eq!(clocks(&tail), vec![n]);
	assert_eq!(svc.count_updates(&id).await.unwrap(), n);
}

/// `racers` writers all computed their edit against version 1.
pub async fn racing_writers_on_one_version(svc: &SyncService, racers: usize) {
	let id = unique_id("race");
	svc.initialize_document(&id, b"S0").await.unwrap();
	assert_eq!(svc.apply_update(&id, b"U1", b"S1", Some(0)).await.unwrap(), 1);

	let mut set = JoinSet::new();
	for i in 0..racers {
		let svc = svc.clone();
		let id = id.clone();
		set.spawn(async move {
			let update = format!("U2-{i}").into_bytes();
			let state = format!("S2-{i}").into_bytes();
			(i, svc.apply_update(&id, &update, &state, Some(1)).await)
		});
	}

	let mut winners = Vec::new();
	let mut conflicts = 0;
	while let Some(res) = set.join_next().await {
		match res.expect("task") {
			(i, Ok(v)) => {
				assert_eq!(v, 2);
				winners.push(i);
			}
			(
				_,
				Err(SyncError::VersionConflict {
					expected, actual, ..
				}),
			) => {
				assert_eq!(expected, 1);
				assert_eq!(actual, 2);
				conflicts += 1;
			}
			(_, Err(e)) => panic!("unexpected error: {e}"),
		}
	}

	assert_eq!(winners.len(), 1, "exactly one writer wins");
	assert_eq!(conflicts, racers - 1);

	let winner = winners[0];
	let doc = svc.get_document(&id).await.unwrap().unwrap();
	assert_eq!(doc.version, 2);
	assert_eq!(doc.state, format!("S2-{winner}").into_bytes());

	let log = svc.list_updates_after(&id, 0).await.unwrap();
	assert_eq!(clocks(&log), vec![1, 2]);
	assert_eq!(log[1].payload, format!("U2-{winner}").into_bytes());
}

/// Initialize n1 at S0, apply U1, then race U2a and U2b on version 1.
pub async fn two_editors_scenario(svc: &SyncService) {
	let id = unique_id("n1");
	let init = svc.initialize_document(&id, b"S0").await.unwrap();
	assert_eq!(init.snapshot.version, 0);

	assert_eq!(svc.apply_update(&id, b"U1", b"S1", Some(0)).await.unwrap(), 1);
	let log = svc.list_updates_after(&id, 0).await.unwrap();
	assert_eq!(log.len(), 1);
	assert_eq!(log[0].clock, 1);
	assert_eq!(log[0].payload, b"U1");

	let (a, b) = tokio::join!(
		svc.apply_update(&id, b"U2a", b"S2a", Some(1)),
		svc.apply_update(&id, b"U2b", b"S2b", Some(1)),
	);
	let (won, lost) = match (a, b) {
		(Ok(v), Err(e)) => ((v, &b"S2a"[..]), e),
		(Err(e), Ok(v)) => ((v, &b"S2b"[..]), e),
		other => panic!("expected exactly one success, got {other:?}"),
	};
	assert_eq!(won.0, 2);
	assert!(lost.is_conflict());
	assert_eq!(svc.get_state(&id).await.unwrap().unwrap(), won.1);
	assert_eq!(svc.get_version(&id).await.unwrap(), 2);
}

/// Writers that do not pin a base version queue up on the lock and each get
/// their own clock.
pub async fn unconditional_writers_serialize(svc: &SyncService, writers: i64) {
	let id = unique_id("serial");
	svc.initialize_document(&id, b"").await.unwrap();

	let mut set = JoinSet::new();
	for i in 0..writers {
		let svc = svc.clone();
		let id = id.clone();
		set.spawn(async move {
			let bytes = format!("W{i}").into_bytes();
			svc.apply_update(&id, &bytes, &bytes, None).await
		});
	}

	let mut versions = BTreeSet::new();
	while let Some(res) = set.join_next().await {
		versions.insert(res.expect("task").expect("unconditional apply"));
	}
	assert_eq!(versions, (1..=writers).collect::<BTreeSet<_>>());

	let log = svc.list_updates_after(&id, 0).await.unwrap();
	assert_eq!(clocks(&log), (1..=writers).collect::<Vec<_>>());
	let doc = svc.get_document(&id).await.unwrap().unwrap();
	assert_eq!(doc.version, writers);
	// the surviving state belongs to the last logged update
	assert_eq!(doc.state, log.last().unwrap().payload);
}

/// Every writer appends its own marker byte through the rebase helper; none
/// may be lost.
pub async fn rebasing_writers_all_land(svc: &SyncService, writers: u8) {
	let id = unique_id("rebase");
	svc.initialize_document(&id, b"").await.unwrap();

	let mut set = JoinSet::new();
	for i in 0..writers {
		let svc = svc.clone();
		let id = id.clone();
		set.spawn(async move {
			let marker = b'a' + i;
			svc.apply_with_rebase(&id, move |snap| {
				let mut state = snap.state.clone();
				state.push(marker);
				Edit {
					update: vec![marker],
					state,
				}
			})
			.await
		});
	}
	while let Some(res) = set.join_next().await {
		res.expect("task").expect("rebase eventually lands");
	}

	let doc = svc.get_document(&id).await.unwrap().unwrap();
	assert_eq!(doc.version, i64::from(writers));
	let mut state = doc.state.clone();
	state.sort_unstable();
	assert_eq!(state, (0..writers).map(|i| b'a' + i).collect::<Vec<_>>());

	// replaying the log in clock order reproduces the state
	let replayed: Vec<u8> = svc
		.list_updates_after(&id, 0)
		.await
		.unwrap()
		.into_iter()
		.flat_map(|r| r.payload)
		.collect();
	assert_eq!(replayed, doc.state);
}

pub async fn history_since_timestamp(svc: &SyncService) {
	let id = unique_id("since");
	svc.initialize_document(&id, b"S0").await.unwrap();
	let before = Utc::now() - ChronoDuration::seconds(5);

	for i in 1..=3 {
		svc.apply_update(&id, format!("U{i}").as_bytes(), b"S", None)
			.await
			.unwrap();
		sleep(Duration::from_millis(20)).await;
	}

	let all = svc.list_updates_since(&id, before).await.unwrap();
	assert_eq!(clocks(&all), vec![1, 2, 3]);

	let after_first = svc.list_updates_since(&id, all[0].created_at).await.unwrap();
	assert_eq!(clocks(&after_first), vec![2, 3]);

	let none = svc.list_updates_since(&id, all[2].created_at).await.unwrap();
	assert!(none.is_empty());
}

pub async fn replace_bypasses_versioning(svc: &SyncService) {
	let id = unique_id("replace");
	svc.initialize_document(&id, b"S0").await.unwrap();
	svc.apply_update(&id, b"U1", b"S1", None).await.unwrap();

	svc.replace_state(&id, b"compacted").await.unwrap();
	let doc = svc.get_document(&id).await.unwrap().unwrap();
	assert_eq!(doc.state, b"compacted");
	assert_eq!(doc.version, 1);
	assert_eq!(svc.list_updates_after(&id, 0).await.unwrap().len(), 1);

	// the next versioned update continues from the same clock sequence
	assert_eq!(svc.apply_update(&id, b"U2", b"S2", Some(1)).await.unwrap(), 2);

	let missing = unique_id("replace-missing");
	assert!(matches!(
		svc.replace_state(&missing, b"x").await,
		Err(SyncError::NotFound(_))
	));
}

pub async fn delete_removes_everything(svc: &SyncService) {
	let id = unique_id("delete");
	svc.initialize_document(&id, b"S0").await.unwrap();
	for i in 1..=3 {
		svc.apply_update(&id, format!("U{i}").as_bytes(), b"S", None)
			.await
			.unwrap();
	}

	assert_eq!(svc.count_updates(&id).await.unwrap(), 3);
	assert!(svc.delete_document(&id).await.unwrap());
	assert_eq!(svc.count_updates(&id).await.unwrap(), 0);

	assert_eq!(svc.get_state(&id).await.unwrap(), None);
	assert_eq!(svc.get_version(&id).await.unwrap(), 0);
	let epoch = chrono::DateTime::<Utc>::UNIX_EPOCH;
	assert!(svc.list_updates_since(&id, epoch).await.unwrap().is_empty());
	assert!(svc.list_updates_after(&id, 0).await.unwrap().is_empty());

	assert!(!svc.delete_document(&id).await.unwrap());
	assert!(matches!(
		svc.apply_update(&id, b"U4", b"S4", None).await,
		Err(SyncError::NotFound(_))
	));
}

pub async fn missing_document_reads(svc: &SyncService) {
	let id = unique_id("missing");
	assert_eq!(svc.get_state(&id).await.unwrap(), None);
	assert_eq!(svc.get_document(&id).await.unwrap(), None);
	assert_eq!(svc.get_version(&id).await.unwrap(), 0);
	assert_eq!(svc.count_updates(&id).await.unwrap(), 0);
	assert!(matches!(
		svc.apply_update(&id, b"U", b"S", Some(0)).await,
		Err(SyncError::NotFound(_))
	));
	assert!(matches!(
		svc.apply_with_rebase(&id, |_| Edit {
			update: Vec::new(),
			state: Vec::new(),
		})
		.await,
		Err(SyncError::NotFound(_))
	));
}

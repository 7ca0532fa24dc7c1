use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::store::UpdateRecord;

/// Append one record. Returns false if `(document_id, clock)` is already
/// taken; the caller decides how loudly to fail.
pub(super) async fn append(
	conn: &mut PgConnection,
	document_id: &str,
	clock: i64,
	payload: &[u8],
) -> Result<bool, sqlx::Error> {
	let res = sqlx::query(
		"INSERT INTO sync_updates (document_id, clock, payload, created_at) \
		 VALUES ($1, $2, $3, clock_timestamp()) \
		 ON CONFLICT (document_id, clock) DO NOTHING",
	)
	.bind(document_id)
	.bind(clock)
	.bind(payload)
	.execute(&mut *conn)
	.await?;
	Ok(res.rows_affected() == 1)
}

pub(super) async fn list_since(
	conn: &mut PgConnection,
	document_id: &str,
	since: DateTime<Utc>,
) -> Result<Vec<UpdateRecord>, sqlx::Error> {
	sqlx::query_as::<_, UpdateRecord>(
		"SELECT document_id, clock, payload, created_at FROM sync_updates \
		 WHERE document_id = $1 AND created_at > $2 \
		 ORDER BY clock ASC",
	)
	.bind(document_id)
	.bind(since)
	.fetch_all(&mut *conn)
	.await
}

pub(super) async fn list_after_clock(
	conn: &mut PgConnection,
	document_id: &str,
	clock: i64,
) -> Result<Vec<UpdateRecord>, sqlx::Error> {
	sqlx::query_as::<_, UpdateRecord>(
		"SELECT document_id, clock, payload, created_at FROM sync_updates \
		 WHERE document_id = $1 AND clock > $2 \
		 ORDER BY clock ASC",
	)
	.bind(document_id)
	.bind(clock)
	.fetch_all(&mut *conn)
	.await
}

pub(super) async fn count(conn: &mut PgConnection, document_id: &str) -> Result<i64, sqlx::Error> {
	sqlx::query_scalar::<_, i64>("SELECT count(*) FROM sync_updates WHERE document_id = $1")
		.bind(document_id)
		.fetch_one(&mut *conn)
		.await
}

pub(super) async fn purge(conn: &mut PgConnection, document_id: &str) -> Result<u64, sqlx::Error> {
	let res = sqlx::query("DELETE FROM sync_updates WHERE document_id = $1")
		.bind(document_id)
		.execute(&mut *conn)
		.await?;
	Ok(res.rows_affected())
}

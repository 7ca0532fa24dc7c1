use sqlx::PgConnection;

use crate::store::DocumentSnapshot;

pub(super) async fn fetch(
	conn: &mut PgConnection,
	id: &str,
) -> Result<Option<DocumentSnapshot>, sqlx::Error> {
	sqlx::query_as::<_, DocumentSnapshot>(
		"SELECT id, state, version, updated_at FROM sync_documents WHERE id = $1",
	)
	.bind(id)
	.fetch_optional(&mut *conn)
	.await
}

pub(super) async fn version(conn: &mut PgConnection, id: &str) -> Result<Option<i64>, sqlx::Error> {
	sqlx::query_scalar::<_, i64>("SELECT version FROM sync_documents WHERE id = $1")
		.bind(id)
		.fetch_optional(&mut *conn)
		.await
}

/// Take the exclusive row lock and return the version read under it. Blocks
/// until concurrent writers on the same row commit or roll back.
pub(super) async fn lock_version(
	conn: &mut PgConnection,
	id: &str,
) -> Result<Option<i64>, sqlx::Error> {
	sqlx::query_scalar::<_, i64>("SELECT version FROM sync_documents WHERE id = $1 FOR UPDATE")
		.bind(id)
		.fetch_optional(&mut *conn)
		.await
}

/// Insert at version 0 unless the id exists. Returns true if a row was created.
pub(super) async fn insert_if_absent(
	conn: &mut PgConnection,
	id: &str,
	state: &[u8],
) -> Result<bool, sqlx::Error> {
	let res = sqlx::query(
		"INSERT INTO sync_documents (id, state, version, updated_at) \
		 VALUES ($1, $2, 0, clock_timestamp()) \
		 ON CONFLICT (id) DO NOTHING",
	)
	.bind(id)
	.bind(state)
	.execute(&mut *conn)
	.await?;
	Ok(res.rows_affected() == 1)
}

/// Conditional update from `from_version` to `from_version + 1`. Returns false
/// when the stored version no longer matches.
pub(super) async fn advance(
	conn: &mut PgConnection,
	id: &str,
	from_version: i64,
	state: &[u8],
) -> Result<bool, sqlx::Error> {
	let res = sqlx::query(
		"UPDATE sync_documents \
		 SET state = $2, version = $3, updated_at = clock_timestamp() \
		 WHERE id = $1 AND version = $4",
	)
	.bind(id)
	.bind(state)
	.bind(from_version + 1)
	.bind(from_version)
	.execute(&mut *conn)
	.await?;
	Ok(res.rows_affected() == 1)
}

pub(super) async fn overwrite_state(
	conn: &mut PgConnection,
	id: &str,
	state: &[u8],
) -> Result<bool, sqlx::Error> {
	let res = sqlx::query(
		"UPDATE sync_documents SET state = $2, updated_at = clock_timestamp() WHERE id = $1",
	)
	.bind(id)
	.bind(state)
	.execute(&mut *conn)
	.await?;
	Ok(res.rows_affected() == 1)
}

pub(super) async fn remove(conn: &mut PgConnection, id: &str) -> Result<bool, sqlx::Error> {
	let res = sqlx::query("DELETE FROM sync_documents WHERE id = $1")
		.bind(id)
		.execute(&mut *conn)
		.await?;
	Ok(res.rows_affected() == 1)
}

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{DbError, DbResult};

/// Opens the store connection pool. Mirrors the teacher's
/// `DbConnection::open_*` constructors in shape (one call, a typed
/// error), rebuilt on `sqlx::PgPool` for the multi-writer row locking
/// the job queue needs.
pub async fn connect(database_url: &str, max_connections: u32) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// `SELECT 1` with the 5 s client timeout `spec.md` §5 assigns store
/// pings. Used by the store heartbeat loop in `core_bin`.
pub async fn ping(pool: &PgPool) -> DbResult<()> {
    let fut = sqlx::query("SELECT 1").execute(pool);
    match tokio::time::timeout(Duration::from_secs(5), fut).await {
        Ok(Ok(_result)) => Ok(()),
        Ok(Err(e)) => Err(DbError::Sqlx(e)),
        Err(_elapsed) => Err(DbError::PingTimeout(Duration::from_secs(5))),
    }
}

/// Applies the bootstrap schema. Schema migration is an external
/// collaborator in production (`spec.md` §1); this is only used by
/// integration tests to stand up a throwaway database.
pub async fn apply_test_schema(pool: &PgPool) -> DbResult<()> {
    let schema = include_str!("../schema/test_schema.sql");
    for statement in schema.split(';') {
        let trimmed = statement.trim();
        if trimmed.is_empty() {
            continue;
        }
        sqlx::query(trimmed).execute(pool).await?;
    }
    Ok(())
}

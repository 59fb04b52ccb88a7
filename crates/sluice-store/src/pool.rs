//! Connection pool setup and schema migration.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use sluice_core::{Error, Result};

/// Idle connections are reclaimed after this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Acquiring a connection fails after this long; pool exhaustion
/// surfaces here rather than hanging callers.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connects a bounded pool to the given Postgres URL.
///
/// # Errors
///
/// Returns a storage error when the database is unreachable.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .idle_timeout(IDLE_TIMEOUT)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
        .map_err(|e| Error::storage_with_source("failed to connect to database", e))
}

/// Applies pending schema migrations.
///
/// # Errors
///
/// Returns a storage error when a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| Error::storage_with_source("failed to run migrations", e))
}

/// Shallow liveness check: acquires a connection and runs `SELECT 1`.
///
/// # Errors
///
/// Returns a storage error when the pool is exhausted or the store is
/// unreachable.
pub async fn ping(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(|e| Error::storage_with_source("database ping failed", e))
}

//! Schema migrations embedded from `migrations/sqlite`.
//!
//! Both instances of a store run the same set at startup. New schema goes in
//! a new `NNN_name.sql` file; applied files are checksummed by sqlx and must
//! stay untouched.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

static SCHEMA: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    let (known, applied) = migration_status(pool).await?;
    if applied >= known {
        debug!(version = known, "Schema up to date");
        return Ok(());
    }

    SCHEMA.run(pool).await?;
    info!(from = applied, to = known, "Schema migrated");
    Ok(())
}

/// `(embedded, applied)` migration counts. A fresh file has applied none.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let applied: Option<i64> =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await
            .ok();

    Ok((SCHEMA.migrations.len(), applied.unwrap_or(0).max(0) as usize))
}

//! # Schema
//!
//! The SQL files under `migrations/sqlite/` are compiled into the binary and
//! applied on open.
//!
//! ```text
//! open ──► _sqlx_migrations present? ──no──► create it
//!                     │
//!                     ▼
//!          001_initial_schema.sql   applied, checksum matches
//!          00N_next.sql             pending ──► run in its own transaction
//! ```
//!
//! Files are append-only: a changed checksum on an applied file stops the
//! service at startup. New columns and tables go in a new `NNN_name.sql`.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Known vs applied migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaStatus {
    pub known: usize,
    pub applied: usize,
}

impl SchemaStatus {
    pub fn is_current(&self) -> bool {
        self.applied >= self.known
    }
}

pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    let before = schema_status(pool).await?;
    if before.is_current() {
        debug!(applied = before.applied, "Schema up to date");
        return Ok(());
    }

    MIGRATOR.run(pool).await?;
    info!(
        from = before.applied,
        to = MIGRATOR.migrations.len(),
        "Schema migrated"
    );
    Ok(())
}

/// Reads the bookkeeping table; a store that was never migrated reports 0.
pub async fn schema_status(pool: &SqlitePool) -> DbResult<SchemaStatus> {
    let known = MIGRATOR.migrations.len();

    let has_table: bool = sqlx::query_scalar(
        "SELECT EXISTS (
             SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'
         )",
    )
    .fetch_one(pool)
    .await?;
    if !has_table {
        return Ok(SchemaStatus { known, applied: 0 });
    }

    let applied: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?;
    Ok(SchemaStatus {
        known,
        applied: usize::try_from(applied).unwrap_or(0),
    })
}

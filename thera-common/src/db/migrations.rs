//! Database schema migrations
//!
//! Versioned, idempotent migrations tracked in the `schema_version` table.
//! Tables are created with `CREATE TABLE IF NOT EXISTS` in `init`; migrations
//! hold everything that must be checked against existing data first.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - they must stay stable for upgrades
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Keep them idempotent** - `IF NOT EXISTS` or a `pragma_table_info` check

use crate::{Error, Result};
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if schema_version has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: lookup indexes used by the lifecycle queries and the sweeper
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_assignments_status_planned ON assignments(status, planned_start_date)",
        "CREATE INDEX IF NOT EXISTS idx_assignments_route_status ON assignments(route_id, status)",
        "CREATE INDEX IF NOT EXISTS idx_assignments_child ON assignments(child_id)",
        "CREATE INDEX IF NOT EXISTS idx_route_goals_route ON route_goals(route_id)",
        "CREATE INDEX IF NOT EXISTS idx_route_phases_route ON route_phases(route_id, order_index)",
        "CREATE INDEX IF NOT EXISTS idx_routes_child_status ON routes(child_id, status)",
        "CREATE INDEX IF NOT EXISTS idx_outbox_status_seq ON outbox_events(status, seq)",
        "CREATE INDEX IF NOT EXISTS idx_outbox_aggregate ON outbox_events(aggregate_id, seq)",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

/// Migration v2: at most one active route per child, enforced by the database
///
/// Refuses to build the index over data that already violates it, so an
/// operator resolves the duplicates instead of SQLite failing mid-migration.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    let duplicated_children: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT child_id FROM routes
        WHERE status = 'active'
        GROUP BY child_id
        HAVING COUNT(*) > 1
        "#,
    )
    .fetch_all(pool)
    .await?;

    if !duplicated_children.is_empty() {
        return Err(Error::Internal(format!(
            "Cannot create active-route uniqueness index: children with several active routes: {}",
            duplicated_children.join(", ")
        )));
    }

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_routes_one_active_per_child
        ON routes(child_id) WHERE status = 'active'
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

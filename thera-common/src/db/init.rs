//! Database initialization
//!
//! Creates the database on first run, applies connection settings to every
//! pooled connection, creates the lifecycle tables and runs migrations.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default SQLite busy timeout when the caller has no configuration
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    init_database_with_timeout(db_path, DEFAULT_BUSY_TIMEOUT_MS).await
}

/// Initialize database with an explicit busy timeout
///
/// The busy timeout bounds how long a statement waits for another writer to
/// release the database lock before failing with SQLITE_BUSY.
pub async fn init_database_with_timeout(db_path: &Path, busy_timeout_ms: u64) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Per-connection settings: PRAGMAs issued on a pool only reach one connection
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Idempotent - safe to call multiple times
    create_schema_version_table(&pool).await?;
    create_routes_table(&pool).await?;
    create_route_goals_table(&pool).await?;
    create_route_phases_table(&pool).await?;
    create_route_revisions_table(&pool).await?;
    create_assignments_table(&pool).await?;
    create_outbox_events_table(&pool).await?;

    crate::db::migrations::run_migrations(&pool).await?;

    info!("Database busy timeout set to {} ms", busy_timeout_ms);

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the routes table
///
/// `version` counts mutations for revision display; the row itself is never deleted.
pub async fn create_routes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS routes (
            id TEXT PRIMARY KEY,
            child_id TEXT NOT NULL,
            lead_specialist_id TEXT NOT NULL,
            title TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft'
                CHECK (status IN ('draft', 'active', 'paused', 'completed', 'archived')),
            plan_horizon_weeks INTEGER NOT NULL CHECK (plan_horizon_weeks > 0),
            version INTEGER NOT NULL DEFAULT 1,
            activated_at TEXT,
            completed_at TEXT,
            archived_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_route_goals_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS route_goals (
            id TEXT PRIMARY KEY,
            route_id TEXT NOT NULL REFERENCES routes(id),
            domain TEXT NOT NULL,
            title TEXT NOT NULL,
            priority TEXT NOT NULL CHECK (priority IN ('low', 'medium', 'high')),
            target_date TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_route_phases_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS route_phases (
            id TEXT PRIMARY KEY,
            route_id TEXT NOT NULL REFERENCES routes(id),
            title TEXT NOT NULL,
            order_index INTEGER NOT NULL CHECK (order_index >= 0),
            duration_weeks INTEGER NOT NULL CHECK (duration_weeks > 0),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the append-only route revision log
pub async fn create_route_revisions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS route_revisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            route_id TEXT NOT NULL REFERENCES routes(id),
            version INTEGER NOT NULL,
            changes TEXT NOT NULL,
            changed_by TEXT NOT NULL,
            changed_at TEXT NOT NULL,
            UNIQUE (route_id, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the assignments table
pub async fn create_assignments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assignments (
            id TEXT PRIMARY KEY,
            child_id TEXT NOT NULL,
            specialist_id TEXT NOT NULL,
            route_id TEXT REFERENCES routes(id),
            phase_id TEXT REFERENCES route_phases(id),
            goal_id TEXT REFERENCES route_goals(id),
            exercise_id TEXT,
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'scheduled'
                CHECK (status IN ('scheduled', 'in_progress', 'completed', 'cancelled', 'skipped', 'overdue')),
            planned_start_date TEXT NOT NULL,
            duration_minutes INTEGER NOT NULL CHECK (duration_minutes > 0),
            started_at TEXT,
            completed_at TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the transactional outbox table
///
/// Rows are written in the same transaction as the state change they describe
/// and flipped to `dispatched` by the external dispatcher.
pub async fn create_outbox_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outbox_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT NOT NULL UNIQUE,
            event_name TEXT NOT NULL,
            aggregate_type TEXT NOT NULL,
            aggregate_id TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'dispatched')),
            created_at TEXT NOT NULL,
            dispatched_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

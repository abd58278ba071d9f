//! Tests for database initialization and schema migrations

use tempfile::TempDir;
use thera_common::db::init::init_database;
use thera_common::db::migrations::{get_schema_version, CURRENT_SCHEMA_VERSION};

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("thera.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("thera.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_lifecycle_tables_exist() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("thera.db")).await.unwrap();

    for table in [
        "routes",
        "route_goals",
        "route_phases",
        "route_revisions",
        "assignments",
        "outbox_events",
    ] {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists, "table {} missing", table);
    }
}

#[tokio::test]
async fn test_migrations_reach_current_version() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("thera.db");
    let pool = init_database(&db_path).await.unwrap();

    assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);

    // Second run is a no-op
    pool.close().await;
    let pool = init_database(&db_path).await.unwrap();
    assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
}

#[tokio::test]
async fn test_active_route_index_rejects_second_active_route() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("thera.db")).await.unwrap();

    let insert = r#"
        INSERT INTO routes (id, child_id, lead_specialist_id, title, status,
                            plan_horizon_weeks, created_at, updated_at)
        VALUES (?, 'child-1', 'spec-1', 'Plan', ?, 12,
                '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')
    "#;

    sqlx::query(insert).bind("r1").bind("active").execute(&pool).await.unwrap();
    sqlx::query(insert).bind("r2").bind("draft").execute(&pool).await.unwrap();

    let second_active = sqlx::query(insert).bind("r3").bind("active").execute(&pool).await;
    assert!(second_active.is_err());

    let activate_draft = sqlx::query("UPDATE routes SET status = 'active' WHERE id = 'r2'")
        .execute(&pool)
        .await;
    assert!(activate_draft.is_err());
}

//! Route, goal and phase persistence

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection};
use thera_common::{time, uuid_utils};
use uuid::Uuid;

use super::{Goal, GoalPriority, Phase, Route, RouteStatus};
use crate::error::{Error, Result};
use crate::validation;

const ROUTE_COLUMNS: &str = r#"
    id, status, child_id, lead_specialist_id, title, plan_horizon_weeks, version,
    activated_at, completed_at, archived_at, created_at, updated_at
"#;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Take the write lock on a route row (SQLite's `SELECT ... FOR UPDATE`)
///
/// SQLite grants the database write lock to the first writing statement of a
/// transaction, so every check that follows sees committed state and no other
/// writer, including a concurrent activation for the same child, can
/// interleave before commit. Fails with `NotFound` for unknown ids.
pub async fn lock(conn: &mut SqliteConnection, id: Uuid) -> Result<()> {
    let result = sqlx::query("UPDATE routes SET updated_at = updated_at WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound { entity: "route", id });
    }
    Ok(())
}

pub async fn fetch<'e, E>(executor: E, id: Uuid) -> Result<Option<Route>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM routes WHERE id = ?", ROUTE_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(route_from_row).transpose()
}

pub async fn list_for_child<'e, E>(executor: E, child_id: &str) -> Result<Vec<Route>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM routes WHERE child_id = ? ORDER BY created_at",
        ROUTE_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(child_id).fetch_all(executor).await?;

    rows.iter().map(route_from_row).collect()
}

pub async fn insert(conn: &mut SqliteConnection, r: &Route) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO routes (
            id, status, child_id, lead_specialist_id, title, plan_horizon_weeks, version,
            activated_at, completed_at, archived_at, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(r.id.to_string())
    .bind(r.status.as_str())
    .bind(&r.child_id)
    .bind(&r.lead_specialist_id)
    .bind(&r.title)
    .bind(r.plan_horizon_weeks)
    .bind(r.version)
    .bind(r.activated_at.map(time::to_db))
    .bind(r.completed_at.map(time::to_db))
    .bind(r.archived_at.map(time::to_db))
    .bind(time::to_db(r.created_at))
    .bind(time::to_db(r.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Persist every mutable column of a locked route
pub async fn save(conn: &mut SqliteConnection, r: &Route) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE routes
        SET status = ?, lead_specialist_id = ?, title = ?, plan_horizon_weeks = ?,
            version = ?, activated_at = ?, completed_at = ?, archived_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(r.status.as_str())
    .bind(&r.lead_specialist_id)
    .bind(&r.title)
    .bind(r.plan_horizon_weeks)
    .bind(r.version)
    .bind(r.activated_at.map(time::to_db))
    .bind(r.completed_at.map(time::to_db))
    .bind(r.archived_at.map(time::to_db))
    .bind(time::to_db(r.updated_at))
    .bind(r.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Another active route of the same child, if any
pub async fn active_route_for_child(
    conn: &mut SqliteConnection,
    child_id: &str,
    excluding: Uuid,
) -> Result<Option<Uuid>> {
    let id: Option<String> = sqlx::query_scalar(
        "SELECT id FROM routes WHERE child_id = ? AND status = 'active' AND id != ? LIMIT 1",
    )
    .bind(child_id)
    .bind(excluding.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(uuid_utils::from_db_opt(id)?)
}

pub async fn count_goals(conn: &mut SqliteConnection, route_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM route_goals WHERE route_id = ?")
        .bind(route_id.to_string())
        .fetch_one(&mut *conn)
        .await?;

    Ok(count)
}

// ============================================================================
// Goals
// ============================================================================

pub async fn goals<'e, E>(executor: E, route_id: Uuid) -> Result<Vec<Goal>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT id, route_id, domain, title, priority, target_date
        FROM route_goals
        WHERE route_id = ?
        ORDER BY created_at, id
        "#,
    )
    .bind(route_id.to_string())
    .fetch_all(executor)
    .await?;

    rows.iter().map(goal_from_row).collect()
}

/// Goal owned by the given route; a goal of another route is not found
pub async fn fetch_goal<'e, E>(executor: E, route_id: Uuid, goal_id: Uuid) -> Result<Option<Goal>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT id, route_id, domain, title, priority, target_date
        FROM route_goals
        WHERE id = ? AND route_id = ?
        "#,
    )
    .bind(goal_id.to_string())
    .bind(route_id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(goal_from_row).transpose()
}

pub async fn insert_goal(conn: &mut SqliteConnection, g: &Goal, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO route_goals (id, route_id, domain, title, priority, target_date, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(g.id.to_string())
    .bind(g.route_id.to_string())
    .bind(&g.domain)
    .bind(&g.title)
    .bind(g.priority.as_str())
    .bind(g.target_date.map(|d| d.format(DATE_FORMAT).to_string()))
    .bind(time::to_db(now))
    .bind(time::to_db(now))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn save_goal(conn: &mut SqliteConnection, g: &Goal, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE route_goals
        SET domain = ?, title = ?, priority = ?, target_date = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&g.domain)
    .bind(&g.title)
    .bind(g.priority.as_str())
    .bind(g.target_date.map(|d| d.format(DATE_FORMAT).to_string()))
    .bind(time::to_db(now))
    .bind(g.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn delete_goal(conn: &mut SqliteConnection, goal_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM route_goals WHERE id = ?")
        .bind(goal_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

// ============================================================================
// Phases
// ============================================================================

pub async fn phases<'e, E>(executor: E, route_id: Uuid) -> Result<Vec<Phase>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT id, route_id, title, order_index, duration_weeks
        FROM route_phases
        WHERE route_id = ?
        ORDER BY order_index, created_at
        "#,
    )
    .bind(route_id.to_string())
    .fetch_all(executor)
    .await?;

    rows.iter().map(phase_from_row).collect()
}

/// Phase owned by the given route; a phase of another route is not found
pub async fn fetch_phase<'e, E>(executor: E, route_id: Uuid, phase_id: Uuid) -> Result<Option<Phase>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT id, route_id, title, order_index, duration_weeks
        FROM route_phases
        WHERE id = ? AND route_id = ?
        "#,
    )
    .bind(phase_id.to_string())
    .bind(route_id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(phase_from_row).transpose()
}

/// Order index one past the current last phase
pub async fn next_phase_index(conn: &mut SqliteConnection, route_id: Uuid) -> Result<i64> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(order_index) FROM route_phases WHERE route_id = ?")
            .bind(route_id.to_string())
            .fetch_one(&mut *conn)
            .await?;

    match max {
        None => Ok(0),
        Some(last) => last
            .checked_add(1)
            .ok_or_else(|| Error::Validation("orderIndex out of range".to_string()))
            .and_then(validation::order_index),
    }
}

pub async fn insert_phase(conn: &mut SqliteConnection, p: &Phase, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO route_phases (id, route_id, title, order_index, duration_weeks, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(p.id.to_string())
    .bind(p.route_id.to_string())
    .bind(&p.title)
    .bind(p.order_index)
    .bind(p.duration_weeks)
    .bind(time::to_db(now))
    .bind(time::to_db(now))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn save_phase(conn: &mut SqliteConnection, p: &Phase, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE route_phases
        SET title = ?, order_index = ?, duration_weeks = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&p.title)
    .bind(p.order_index)
    .bind(p.duration_weeks)
    .bind(time::to_db(now))
    .bind(p.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn delete_phase(conn: &mut SqliteConnection, phase_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM route_phases WHERE id = ?")
        .bind(phase_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

// ============================================================================
// Row mapping
// ============================================================================

fn route_from_row(row: &SqliteRow) -> Result<Route> {
    let status: String = row.try_get("status")?;

    Ok(Route {
        id: uuid_utils::from_db(&row.try_get::<String, _>("id")?)?,
        status: RouteStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown route status '{}'", status)))?,
        child_id: row.try_get("child_id")?,
        lead_specialist_id: row.try_get("lead_specialist_id")?,
        title: row.try_get("title")?,
        plan_horizon_weeks: row.try_get("plan_horizon_weeks")?,
        version: row.try_get("version")?,
        activated_at: time::from_db_opt(row.try_get("activated_at")?)?,
        completed_at: time::from_db_opt(row.try_get("completed_at")?)?,
        archived_at: time::from_db_opt(row.try_get("archived_at")?)?,
        created_at: time::from_db(&row.try_get::<String, _>("created_at")?)?,
        updated_at: time::from_db(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn goal_from_row(row: &SqliteRow) -> Result<Goal> {
    let priority: String = row.try_get("priority")?;
    let target_date: Option<String> = row.try_get("target_date")?;

    Ok(Goal {
        id: uuid_utils::from_db(&row.try_get::<String, _>("id")?)?,
        route_id: uuid_utils::from_db(&row.try_get::<String, _>("route_id")?)?,
        domain: row.try_get("domain")?,
        title: row.try_get("title")?,
        priority: GoalPriority::parse(&priority)
            .ok_or_else(|| Error::Internal(format!("Unknown goal priority '{}'", priority)))?,
        target_date: target_date
            .map(|d| NaiveDate::parse_from_str(&d, DATE_FORMAT))
            .transpose()
            .map_err(|e| Error::Internal(format!("Bad goal target date: {}", e)))?,
    })
}

fn phase_from_row(row: &SqliteRow) -> Result<Phase> {
    Ok(Phase {
        id: uuid_utils::from_db(&row.try_get::<String, _>("id")?)?,
        route_id: uuid_utils::from_db(&row.try_get::<String, _>("route_id")?)?,
        title: row.try_get("title")?,
        order_index: row.try_get("order_index")?,
        duration_weeks: row.try_get("duration_weeks")?,
    })
}

//! Assignment persistence

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection};
use thera_common::{time, uuid_utils};
use uuid::Uuid;

use super::{Assignment, AssignmentFilter, AssignmentStatus};
use crate::error::{Error, Result};

const COLUMNS: &str = r#"
    id, status, child_id, specialist_id, route_id, phase_id, goal_id, exercise_id,
    title, description, planned_start_date, duration_minutes, started_at,
    completed_at, notes, created_at, updated_at
"#;

/// Take the write lock on an assignment row
///
/// A no-op write as the first statement makes SQLite grant this transaction
/// the write lock before anything is read, so the following read cannot be
/// invalidated by a concurrent writer. Fails with `NotFound` for unknown ids.
pub async fn lock(conn: &mut SqliteConnection, id: Uuid) -> Result<()> {
    let result = sqlx::query("UPDATE assignments SET updated_at = updated_at WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound {
            entity: "assignment",
            id,
        });
    }
    Ok(())
}

pub async fn fetch<'e, E>(executor: E, id: Uuid) -> Result<Option<Assignment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM assignments WHERE id = ?", COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(assignment_from_row).transpose()
}

pub async fn list<'e, E>(executor: E, filter: &AssignmentFilter) -> Result<Vec<Assignment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        r#"
        SELECT {} FROM assignments
        WHERE (?1 IS NULL OR child_id = ?1)
          AND (?2 IS NULL OR route_id = ?2)
          AND (?3 IS NULL OR status = ?3)
        ORDER BY planned_start_date, created_at
        "#,
        COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(filter.child_id.as_deref())
        .bind(filter.route_id.map(|id| id.to_string()))
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(executor)
        .await?;

    rows.iter().map(assignment_from_row).collect()
}

pub async fn insert(conn: &mut SqliteConnection, a: &Assignment) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO assignments (
            id, status, child_id, specialist_id, route_id, phase_id, goal_id, exercise_id,
            title, description, planned_start_date, duration_minutes, started_at,
            completed_at, notes, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(a.id.to_string())
    .bind(a.status.as_str())
    .bind(&a.child_id)
    .bind(&a.specialist_id)
    .bind(a.route_id.map(|id| id.to_string()))
    .bind(a.phase_id.map(|id| id.to_string()))
    .bind(a.goal_id.map(|id| id.to_string()))
    .bind(a.exercise_id.as_deref())
    .bind(&a.title)
    .bind(a.description.as_deref())
    .bind(time::to_db(a.planned_start_date))
    .bind(a.duration_minutes)
    .bind(a.started_at.map(time::to_db))
    .bind(a.completed_at.map(time::to_db))
    .bind(a.notes.as_deref())
    .bind(time::to_db(a.created_at))
    .bind(time::to_db(a.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Persist every mutable column of a locked assignment
pub async fn save(conn: &mut SqliteConnection, a: &Assignment) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE assignments
        SET status = ?, title = ?, description = ?, planned_start_date = ?,
            duration_minutes = ?, started_at = ?, completed_at = ?, notes = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(a.status.as_str())
    .bind(&a.title)
    .bind(a.description.as_deref())
    .bind(time::to_db(a.planned_start_date))
    .bind(a.duration_minutes)
    .bind(a.started_at.map(time::to_db))
    .bind(a.completed_at.map(time::to_db))
    .bind(a.notes.as_deref())
    .bind(time::to_db(a.updated_at))
    .bind(a.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Count scheduled or in-progress assignments referencing a route
pub async fn count_open_for_route(conn: &mut SqliteConnection, route_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM assignments WHERE route_id = ? AND status IN ('scheduled', 'in_progress')",
    )
    .bind(route_id.to_string())
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

/// Count assignments referencing a goal or phase (`column` is a fixed column name)
pub async fn count_referencing(
    conn: &mut SqliteConnection,
    column: &'static str,
    id: Uuid,
) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM assignments WHERE {} = ?", column);
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(id.to_string())
        .fetch_one(&mut *conn)
        .await?;

    Ok(count)
}

/// Promote up to `limit` stale scheduled assignments to overdue
///
/// Single statement: selection and update cannot interleave with another
/// writer, and the `status = 'scheduled'` guard makes a repeated call a no-op
/// for rows already promoted. Returns the promoted assignments.
pub async fn promote_overdue_batch(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<Assignment>> {
    let sql = format!(
        r#"
        UPDATE assignments
        SET status = 'overdue', updated_at = ?1
        WHERE id IN (
            SELECT id FROM assignments
            WHERE status = 'scheduled' AND planned_start_date < ?1
            ORDER BY planned_start_date
            LIMIT ?2
        )
        AND status = 'scheduled'
        RETURNING {}
        "#,
        COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(time::to_db(now))
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(assignment_from_row).collect()
}

fn assignment_from_row(row: &SqliteRow) -> Result<Assignment> {
    let status: String = row.try_get("status")?;

    Ok(Assignment {
        id: uuid_utils::from_db(&row.try_get::<String, _>("id")?)?,
        status: AssignmentStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown assignment status '{}'", status)))?,
        child_id: row.try_get("child_id")?,
        specialist_id: row.try_get("specialist_id")?,
        route_id: uuid_utils::from_db_opt(row.try_get("route_id")?)?,
        phase_id: uuid_utils::from_db_opt(row.try_get("phase_id")?)?,
        goal_id: uuid_utils::from_db_opt(row.try_get("goal_id")?)?,
        exercise_id: row.try_get("exercise_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        planned_start_date: time::from_db(&row.try_get::<String, _>("planned_start_date")?)?,
        duration_minutes: row.try_get("duration_minutes")?,
        started_at: time::from_db_opt(row.try_get("started_at")?)?,
        completed_at: time::from_db_opt(row.try_get("completed_at")?)?,
        notes: row.try_get("notes")?,
        created_at: time::from_db(&row.try_get::<String, _>("created_at")?)?,
        updated_at: time::from_db(&row.try_get::<String, _>("updated_at")?)?,
    })
}

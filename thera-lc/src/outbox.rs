//! Transactional outbox
//!
//! `publish` appends an event row on the caller's transaction connection, so
//! the event commits or rolls back together with the state change it
//! describes. Delivery is left to an external dispatcher that polls
//! `pending` rows and calls `mark_dispatched`; consumers deduplicate on
//! `event_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use thera_common::{time, uuid_utils};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Domain event names announced through the outbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    AssignmentCreated,
    AssignmentStatusChanged,
    AssignmentUpdated,
    RouteCreated,
    RouteActivated,
    RouteCompleted,
    RoutePaused,
    RouteArchived,
    RouteUpdated,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::AssignmentCreated => "assignments.assignment.created",
            EventName::AssignmentStatusChanged => "assignments.assignment.status_changed",
            EventName::AssignmentUpdated => "assignments.assignment.updated",
            EventName::RouteCreated => "routes.route.created",
            EventName::RouteActivated => "routes.route.activated",
            EventName::RouteCompleted => "routes.route.completed",
            EventName::RoutePaused => "routes.route.paused",
            EventName::RouteArchived => "routes.route.archived",
            EventName::RouteUpdated => "routes.route.updated",
        }
    }

    pub fn aggregate_type(&self) -> AggregateType {
        match self {
            EventName::AssignmentCreated
            | EventName::AssignmentStatusChanged
            | EventName::AssignmentUpdated => AggregateType::Assignment,
            _ => AggregateType::Route,
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entity an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    Assignment,
    Route,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Assignment => "assignment",
            AggregateType::Route => "route",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assignment" => Some(AggregateType::Assignment),
            "route" => Some(AggregateType::Route),
            _ => None,
        }
    }
}

/// Delivery status of an outbox row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Dispatched,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Dispatched => "dispatched",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EventStatus::Pending),
            "dispatched" => Some(EventStatus::Dispatched),
            _ => None,
        }
    }
}

/// Persisted outbox row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    pub event_id: Uuid,
    pub event_name: String,
    pub aggregate_type: AggregateType,
    pub aggregate_id: Uuid,
    pub actor_id: String,
    pub payload: serde_json::Value,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

/// Event about to be appended
#[derive(Debug, Clone)]
pub struct NewEvent<'a> {
    pub name: EventName,
    pub aggregate_id: Uuid,
    pub actor_id: &'a str,
    pub payload: serde_json::Value,
}

/// Append one event inside the caller's transaction
///
/// Must be called on the same connection as the state write it describes.
/// An error here must abort that transaction.
pub async fn publish(
    conn: &mut SqliteConnection,
    event: NewEvent<'_>,
    now: DateTime<Utc>,
) -> Result<Uuid> {
    let event_id = uuid_utils::generate();
    let payload = serde_json::to_string(&event.payload)?;

    sqlx::query(
        r#"
        INSERT INTO outbox_events (
            event_id, event_name, aggregate_type, aggregate_id,
            actor_id, payload, status, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)
        "#,
    )
    .bind(event_id.to_string())
    .bind(event.name.as_str())
    .bind(event.name.aggregate_type().as_str())
    .bind(event.aggregate_id.to_string())
    .bind(event.actor_id)
    .bind(payload)
    .bind(time::to_db(now))
    .execute(&mut *conn)
    .await?;

    tracing::debug!(
        event_id = %event_id,
        event_name = %event.name,
        aggregate_id = %event.aggregate_id,
        "Outbox event appended"
    );

    Ok(event_id)
}

/// Oldest pending events first, for the external dispatcher
pub async fn pending(db: &SqlitePool, limit: u32) -> Result<Vec<OutboxEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT event_id, event_name, aggregate_type, aggregate_id, actor_id,
               payload, status, created_at, dispatched_at
        FROM outbox_events
        WHERE status = 'pending'
        ORDER BY seq
        LIMIT ?
        "#,
    )
    .bind(limit as i64)
    .fetch_all(db)
    .await?;

    rows.iter().map(event_from_row).collect()
}

/// Mark an event delivered
///
/// Idempotent: marking an already dispatched event keeps its original
/// `dispatched_at`. Returns `NotFound` for unknown ids.
pub async fn mark_dispatched(db: &SqlitePool, event_id: Uuid, now: DateTime<Utc>) -> Result<OutboxEvent> {
    sqlx::query(
        r#"
        UPDATE outbox_events
        SET status = 'dispatched', dispatched_at = ?
        WHERE event_id = ? AND status = 'pending'
        "#,
    )
    .bind(time::to_db(now))
    .bind(event_id.to_string())
    .execute(db)
    .await?;

    let row = sqlx::query(
        r#"
        SELECT event_id, event_name, aggregate_type, aggregate_id, actor_id,
               payload, status, created_at, dispatched_at
        FROM outbox_events
        WHERE event_id = ?
        "#,
    )
    .bind(event_id.to_string())
    .fetch_optional(db)
    .await?
    .ok_or(Error::NotFound {
        entity: "outbox event",
        id: event_id,
    })?;

    event_from_row(&row)
}

/// All events recorded for one aggregate, in append order
pub async fn events_for_aggregate(db: &SqlitePool, aggregate_id: Uuid) -> Result<Vec<OutboxEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT event_id, event_name, aggregate_type, aggregate_id, actor_id,
               payload, status, created_at, dispatched_at
        FROM outbox_events
        WHERE aggregate_id = ?
        ORDER BY seq
        "#,
    )
    .bind(aggregate_id.to_string())
    .fetch_all(db)
    .await?;

    rows.iter().map(event_from_row).collect()
}

fn event_from_row(row: &SqliteRow) -> Result<OutboxEvent> {
    let aggregate_type: String = row.try_get("aggregate_type")?;
    let status: String = row.try_get("status")?;
    let payload: String = row.try_get("payload")?;

    Ok(OutboxEvent {
        event_id: uuid_utils::from_db(&row.try_get::<String, _>("event_id")?)?,
        event_name: row.try_get("event_name")?,
        aggregate_type: AggregateType::parse(&aggregate_type)
            .ok_or_else(|| Error::Internal(format!("Unknown aggregate type '{}'", aggregate_type)))?,
        aggregate_id: uuid_utils::from_db(&row.try_get::<String, _>("aggregate_id")?)?,
        actor_id: row.try_get("actor_id")?,
        payload: serde_json::from_str(&payload)?,
        status: EventStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown outbox status '{}'", status)))?,
        created_at: time::from_db(&row.try_get::<String, _>("created_at")?)?,
        dispatched_at: time::from_db_opt(row.try_get("dispatched_at")?)?,
    })
}

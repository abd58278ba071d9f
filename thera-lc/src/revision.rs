//! Route revision history
//!
//! Append-only log keyed by `(route_id, version)`. One entry per route
//! mutation, written in the mutation's transaction; rows are never updated
//! or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::{Row, SqliteConnection, SqlitePool};
use thera_common::time;
use uuid::Uuid;

use crate::error::Result;

/// One audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRevision {
    pub route_id: Uuid,
    pub version: i64,
    pub changes: Value,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}

/// Diff accumulator: `{field: {"from": old, "to": new}}` plus free-form entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes(Map<String, Value>);

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a field change; unchanged values are skipped
    pub fn field<T: Serialize + PartialEq>(&mut self, name: &str, old: &T, new: &T) -> &mut Self {
        if old != new {
            self.0
                .insert(name.to_string(), json!({ "from": old, "to": new }));
        }
        self
    }

    /// Record an arbitrary entry (snapshots, added/removed children)
    pub fn entry(&mut self, name: &str, value: Value) -> &mut Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Append a revision inside the mutation's transaction
///
/// The UNIQUE(route_id, version) constraint rejects a duplicate version, which
/// aborts the enclosing transaction.
pub async fn record(
    conn: &mut SqliteConnection,
    route_id: Uuid,
    version: i64,
    changes: &Changes,
    changed_by: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO route_revisions (route_id, version, changes, changed_by, changed_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(route_id.to_string())
    .bind(version)
    .bind(serde_json::to_string(&changes.as_value())?)
    .bind(changed_by)
    .bind(time::to_db(now))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Revisions of a route, oldest first
pub async fn list(db: &SqlitePool, route_id: Uuid) -> Result<Vec<RouteRevision>> {
    let rows = sqlx::query(
        r#"
        SELECT version, changes, changed_by, changed_at
        FROM route_revisions
        WHERE route_id = ?
        ORDER BY version
        "#,
    )
    .bind(route_id.to_string())
    .fetch_all(db)
    .await?;

    rows.iter()
        .map(|row| -> Result<RouteRevision> {
            let changes: String = row.try_get("changes")?;
            Ok(RouteRevision {
                route_id,
                version: row.try_get("version")?,
                changes: serde_json::from_str(&changes)?,
                changed_by: row.try_get("changed_by")?,
                changed_at: time::from_db(&row.try_get::<String, _>("changed_at")?)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_skips_unchanged_values() {
        let mut changes = Changes::new();
        changes.field("title", &"Plan A", &"Plan A");
        assert!(changes.is_empty());

        changes.field("planHorizonWeeks", &12, &16);
        assert_eq!(
            changes.as_value(),
            json!({ "planHorizonWeeks": { "from": 12, "to": 16 } })
        );
    }

    #[test]
    fn test_entry_and_field_combine() {
        let mut changes = Changes::new();
        changes
            .field("status", &"draft", &"active")
            .entry("goalAdded", json!({ "title": "Say 20 words" }));
        let value = changes.as_value();
        assert_eq!(value["status"]["to"], "active");
        assert_eq!(value["goalAdded"]["title"], "Say 20 words");
    }
}

//! Error types for the lifecycle core
//!
//! Every business rejection is an operational error returned to the caller
//! with enough detail to retry correctly. Database failures (including a
//! failed outbox insert) roll the enclosing transaction back and surface as 500.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle error taxonomy
#[derive(Debug, Error)]
pub enum Error {
    /// Entity id unknown (404)
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// Status pair not in the transition table (400)
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: Uuid,
        from: String,
        to: String,
    },

    /// Field edit on an assignment in a terminal status (400)
    #[error("Assignment {id} is {status} and can no longer be modified")]
    AssignmentImmutable { id: Uuid, status: String },

    /// Structural edit on a completed or archived route (400)
    #[error("Route {id} is {status} and can no longer be modified")]
    RouteImmutable { id: Uuid, status: String },

    /// Malformed field values (400)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Route would be left without goals (409)
    #[error("Route {route_id} has no goals")]
    EmptyRoute { route_id: Uuid },

    /// Child already has an active route (409)
    #[error("Child {child_id} already has an active route")]
    ActiveRouteConflict {
        child_id: String,
        active_route_id: Option<Uuid>,
    },

    /// Route still has scheduled or in-progress assignments (409)
    #[error("Route {route_id} has {open_assignments} open assignments")]
    OpenAssignmentsExist { route_id: Uuid, open_assignments: i64 },

    /// Goal or phase still referenced by assignments (409)
    #[error("{entity} {id} is referenced by {assignments} assignments")]
    InUse {
        entity: &'static str,
        id: Uuid,
        assignments: i64,
    },

    /// Caller edited an outdated route version (409)
    #[error("Route {route_id} is at version {actual}, expected {expected}")]
    StaleVersion {
        route_id: Uuid,
        expected: i64,
        actual: i64,
    },

    /// Database operation error, including outbox insert failure (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Payload serialization error (500)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// thera-common error (500)
    #[error("Common error: {0}")]
    Common(#[from] thera_common::Error),

    /// Internal error (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using the lifecycle Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::InvalidTransition { .. }
            | Error::AssignmentImmutable { .. }
            | Error::RouteImmutable { .. }
            | Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::EmptyRoute { .. }
            | Error::ActiveRouteConflict { .. }
            | Error::OpenAssignmentsExist { .. }
            | Error::InUse { .. }
            | Error::StaleVersion { .. } => StatusCode::CONFLICT,
            Error::Database(_) | Error::Serialization(_) | Error::Common(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "NOT_FOUND",
            Error::InvalidTransition { .. } => "INVALID_TRANSITION",
            Error::AssignmentImmutable { .. } => "ASSIGNMENT_IMMUTABLE",
            Error::RouteImmutable { .. } => "ROUTE_IMMUTABLE",
            Error::Validation(_) => "VALIDATION_FAILED",
            Error::EmptyRoute { .. } => "EMPTY_ROUTE",
            Error::ActiveRouteConflict { .. } => "ACTIVE_ROUTE_CONFLICT",
            Error::OpenAssignmentsExist { .. } => "OPEN_ASSIGNMENTS_EXIST",
            Error::InUse { .. } => "IN_USE",
            Error::StaleVersion { .. } => "STALE_VERSION",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Common(_) => "COMMON_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the failure came from SQLite lock contention and the whole
    /// transaction may be retried
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(err) => thera_common::error::is_sqlite_busy(err),
            Error::Common(err) => err.is_lock_contention(),
            _ => false,
        }
    }

    fn details(&self) -> Map<String, Value> {
        let mut details = Map::new();
        match self {
            Error::NotFound { entity, id } => {
                details.insert("entity".into(), json!(entity));
                details.insert("id".into(), json!(id));
            }
            Error::InvalidTransition { entity, id, from, to } => {
                details.insert("entity".into(), json!(entity));
                details.insert("id".into(), json!(id));
                details.insert("currentStatus".into(), json!(from));
                details.insert("requestedStatus".into(), json!(to));
            }
            Error::AssignmentImmutable { id, status } | Error::RouteImmutable { id, status } => {
                details.insert("id".into(), json!(id));
                details.insert("currentStatus".into(), json!(status));
            }
            Error::EmptyRoute { route_id } => {
                details.insert("routeId".into(), json!(route_id));
            }
            Error::ActiveRouteConflict { child_id, active_route_id } => {
                details.insert("childId".into(), json!(child_id));
                details.insert("activeRouteId".into(), json!(active_route_id));
            }
            Error::OpenAssignmentsExist { route_id, open_assignments } => {
                details.insert("routeId".into(), json!(route_id));
                details.insert("openAssignments".into(), json!(open_assignments));
            }
            Error::InUse { entity, id, assignments } => {
                details.insert("entity".into(), json!(entity));
                details.insert("id".into(), json!(id));
                details.insert("assignments".into(), json!(assignments));
            }
            Error::StaleVersion { route_id, expected, actual } => {
                details.insert("routeId".into(), json!(route_id));
                details.insert("expectedVersion".into(), json!(expected));
                details.insert("currentVersion".into(), json!(actual));
            }
            _ => {}
        }
        details
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Lifecycle operation failed");
        }

        let mut error = Map::new();
        error.insert("code".into(), json!(self.code()));
        error.insert("message".into(), json!(self.to_string()));
        error.extend(self.details());

        (status, Json(json!({ "error": error }))).into_response()
    }
}

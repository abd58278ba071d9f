//! Assignment endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::Actor;
use crate::assignment::{Assignment, AssignmentFilter, AssignmentStatus, AssignmentUpdate, NewAssignment};
use crate::error::Result;
use crate::sweeper::SweepReport;
use crate::AppState;

/// Body of a status change request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: AssignmentStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Optional body of the complete/cancel shortcuts
#[derive(Debug, Default, Deserialize)]
pub struct NotesBody {
    #[serde(default)]
    pub notes: Option<String>,
}

/// POST /assignments
pub async fn create_assignment(
    State(state): State<AppState>,
    actor: Actor,
    Json(input): Json<NewAssignment>,
) -> Result<(StatusCode, Json<Assignment>)> {
    let assignment = state.assignments.create(&input, actor.as_str()).await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// GET /assignments?childId=&routeId=&status=
pub async fn list_assignments(
    State(state): State<AppState>,
    Query(filter): Query<AssignmentFilter>,
) -> Result<Json<Vec<Assignment>>> {
    Ok(Json(state.assignments.list(&filter).await?))
}

/// GET /assignments/:id
pub async fn get_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Assignment>> {
    Ok(Json(state.assignments.get(id).await?))
}

/// PATCH /assignments/:id
pub async fn update_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(input): Json<AssignmentUpdate>,
) -> Result<Json<Assignment>> {
    Ok(Json(state.assignments.update(id, &input, actor.as_str()).await?))
}

/// POST or PATCH /assignments/:id/status
pub async fn change_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(change): Json<StatusChange>,
) -> Result<Json<Assignment>> {
    let assignment = state
        .assignments
        .transition(id, change.status, actor.as_str(), change.notes.as_deref())
        .await?;
    Ok(Json(assignment))
}

/// POST /assignments/:id/complete
pub async fn complete_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
    body: Option<Json<NotesBody>>,
) -> Result<Json<Assignment>> {
    let notes = body.and_then(|Json(b)| b.notes);
    let assignment = state
        .assignments
        .transition(id, AssignmentStatus::Completed, actor.as_str(), notes.as_deref())
        .await?;
    Ok(Json(assignment))
}

/// POST /assignments/:id/cancel
pub async fn cancel_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
    body: Option<Json<NotesBody>>,
) -> Result<Json<Assignment>> {
    let notes = body.and_then(|Json(b)| b.notes);
    let assignment = state
        .assignments
        .transition(id, AssignmentStatus::Cancelled, actor.as_str(), notes.as_deref())
        .await?;
    Ok(Json(assignment))
}

/// POST /assignments/mark-overdue
///
/// Manual sweep trigger; the actor is required for the audit log only.
pub async fn mark_overdue(State(state): State<AppState>, actor: Actor) -> Result<Json<SweepReport>> {
    tracing::info!(actor = %actor.as_str(), "Manual overdue sweep requested");
    Ok(Json(state.sweeper.run_once().await?))
}

pub fn assignment_routes() -> Router<AppState> {
    Router::new()
        .route("/assignments", post(create_assignment).get(list_assignments))
        .route("/assignments/mark-overdue", post(mark_overdue))
        .route(
            "/assignments/:id",
            get(get_assignment).patch(update_assignment),
        )
        .route(
            "/assignments/:id/status",
            post(change_status).patch(change_status),
        )
        .route("/assignments/:id/complete", post(complete_assignment))
        .route("/assignments/:id/cancel", post(cancel_assignment))
}

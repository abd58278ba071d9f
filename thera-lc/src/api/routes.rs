//! Route endpoints: lifecycle, goals, phases and history

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::Actor;
use crate::error::Result;
use crate::outbox::{self, OutboxEvent};
use crate::revision::RouteRevision;
use crate::route::{
    Goal, GoalUpdate, NewGoal, NewPhase, NewRoute, Phase, PhaseUpdate, Route, RouteDetail,
    RouteUpdate,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildQuery {
    pub child_id: String,
}

/// Optimistic version guard for DELETE requests
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionQuery {
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// POST /routes
pub async fn create_route(
    State(state): State<AppState>,
    actor: Actor,
    Json(input): Json<NewRoute>,
) -> Result<(StatusCode, Json<Route>)> {
    let route = state.routes.create(&input, actor.as_str()).await?;
    Ok((StatusCode::CREATED, Json(route)))
}

/// GET /routes?childId=
pub async fn list_routes(
    State(state): State<AppState>,
    Query(query): Query<ChildQuery>,
) -> Result<Json<Vec<Route>>> {
    Ok(Json(state.routes.list_for_child(&query.child_id).await?))
}

/// GET /routes/:id
pub async fn get_route(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RouteDetail>> {
    Ok(Json(state.routes.get_detail(id).await?))
}

/// PATCH /routes/:id
pub async fn update_route(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(input): Json<RouteUpdate>,
) -> Result<Json<Route>> {
    Ok(Json(state.routes.update(id, &input, actor.as_str()).await?))
}

pub async fn activate_route(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Route>> {
    Ok(Json(state.routes.activate(id, actor.as_str()).await?))
}

pub async fn complete_route(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Route>> {
    Ok(Json(state.routes.complete(id, actor.as_str()).await?))
}

pub async fn pause_route(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Route>> {
    Ok(Json(state.routes.pause(id, actor.as_str()).await?))
}

pub async fn archive_route(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Route>> {
    Ok(Json(state.routes.archive(id, actor.as_str()).await?))
}

/// GET /routes/:id/revisions
pub async fn list_revisions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RouteRevision>>> {
    Ok(Json(state.routes.revisions(id).await?))
}

/// GET /routes/:id/events
pub async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OutboxEvent>>> {
    state.routes.get(id).await?;
    Ok(Json(outbox::events_for_aggregate(&state.db, id).await?))
}

// ============================================================================
// Goals
// ============================================================================

/// POST /routes/:id/goals
pub async fn create_goal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(input): Json<NewGoal>,
) -> Result<(StatusCode, Json<Goal>)> {
    let goal = state.routes.create_goal(id, &input, actor.as_str()).await?;
    Ok((StatusCode::CREATED, Json(goal)))
}

/// PUT /routes/:id/goals/:goal_id
pub async fn update_goal(
    State(state): State<AppState>,
    Path((id, goal_id)): Path<(Uuid, Uuid)>,
    actor: Actor,
    Json(input): Json<GoalUpdate>,
) -> Result<Json<Goal>> {
    Ok(Json(
        state
            .routes
            .update_goal(id, goal_id, &input, actor.as_str())
            .await?,
    ))
}

/// DELETE /routes/:id/goals/:goal_id?expectedVersion=
pub async fn delete_goal(
    State(state): State<AppState>,
    Path((id, goal_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<VersionQuery>,
    actor: Actor,
) -> Result<Json<Route>> {
    Ok(Json(
        state
            .routes
            .delete_goal(id, goal_id, query.expected_version, actor.as_str())
            .await?,
    ))
}

// ============================================================================
// Phases
// ============================================================================

/// POST /routes/:id/phases
pub async fn create_phase(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(input): Json<NewPhase>,
) -> Result<(StatusCode, Json<Phase>)> {
    let phase = state.routes.create_phase(id, &input, actor.as_str()).await?;
    Ok((StatusCode::CREATED, Json(phase)))
}

/// PUT /routes/:id/phases/:phase_id
pub async fn update_phase(
    State(state): State<AppState>,
    Path((id, phase_id)): Path<(Uuid, Uuid)>,
    actor: Actor,
    Json(input): Json<PhaseUpdate>,
) -> Result<Json<Phase>> {
    Ok(Json(
        state
            .routes
            .update_phase(id, phase_id, &input, actor.as_str())
            .await?,
    ))
}

/// DELETE /routes/:id/phases/:phase_id?expectedVersion=
pub async fn delete_phase(
    State(state): State<AppState>,
    Path((id, phase_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<VersionQuery>,
    actor: Actor,
) -> Result<Json<Route>> {
    Ok(Json(
        state
            .routes
            .delete_phase(id, phase_id, query.expected_version, actor.as_str())
            .await?,
    ))
}

pub fn route_routes() -> Router<AppState> {
    Router::new()
        .route("/routes", post(create_route).get(list_routes))
        .route("/routes/:id", get(get_route).patch(update_route))
        .route("/routes/:id/activate", post(activate_route))
        .route("/routes/:id/complete", post(complete_route))
        .route("/routes/:id/pause", post(pause_route))
        .route("/routes/:id/archive", post(archive_route))
        .route("/routes/:id/revisions", get(list_revisions))
        .route("/routes/:id/events", get(list_events))
        .route("/routes/:id/goals", post(create_goal))
        .route(
            "/routes/:id/goals/:goal_id",
            put(update_goal).delete(delete_goal),
        )
        .route("/routes/:id/phases", post(create_phase))
        .route(
            "/routes/:id/phases/:phase_id",
            put(update_phase).delete(delete_phase),
        )
}

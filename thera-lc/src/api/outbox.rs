//! Dispatcher-facing outbox endpoints

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use thera_common::time;
use uuid::Uuid;

use crate::error::Result;
use crate::outbox::{self, OutboxEvent};
use crate::AppState;

const DEFAULT_PENDING_LIMIT: u32 = 100;
const MAX_PENDING_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    DEFAULT_PENDING_LIMIT
}

/// GET /outbox/pending?limit=
pub async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> Result<Json<Vec<OutboxEvent>>> {
    let limit = query.limit.clamp(1, MAX_PENDING_LIMIT);
    Ok(Json(outbox::pending(&state.db, limit).await?))
}

/// POST /outbox/:event_id/dispatched
pub async fn mark_dispatched(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<OutboxEvent>> {
    Ok(Json(
        outbox::mark_dispatched(&state.db, event_id, time::now()).await?,
    ))
}

pub fn outbox_routes() -> Router<AppState> {
    Router::new()
        .route("/outbox/pending", get(list_pending))
        .route("/outbox/:event_id/dispatched", post(mark_dispatched))
}

//! thera-lc library - Assignment and Route lifecycle core
//!
//! Two cooperating state machines (assignments and routes) whose every state
//! change commits together with its outbox event, plus a periodic overdue
//! sweeper and an append-only route revision log.

use axum::Router;
use sqlx::SqlitePool;
use thera_common::config::LifecycleConfig;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod assignment;
pub mod db;
pub mod error;
pub mod outbox;
pub mod revision;
pub mod route;
pub mod sweeper;
pub mod validation;

pub use assignment::AssignmentManager;
pub use error::{Error, Result};
pub use route::RouteManager;
pub use sweeper::OverdueSweeper;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    pub assignments: AssignmentManager,
    pub routes: RouteManager,
    pub sweeper: OverdueSweeper,
}

impl AppState {
    pub fn new(db: SqlitePool, config: &LifecycleConfig) -> Self {
        Self {
            assignments: AssignmentManager::new(db.clone(), config.max_lock_wait_ms),
            routes: RouteManager::new(db.clone(), config.max_lock_wait_ms),
            sweeper: OverdueSweeper::new(db.clone(), config.sweep_batch_size, config.max_lock_wait_ms),
            db,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::assignment_routes())
        .merge(api::route_routes())
        .merge(api::outbox_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

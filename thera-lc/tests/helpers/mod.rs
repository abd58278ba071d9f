//! Test Helper Utilities
//!
//! Shared fixtures for thera-lc integration tests
#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;
use thera_common::config::LifecycleConfig;
use thera_common::db::init_database;
use thera_lc::assignment::{Assignment, NewAssignment};
use thera_lc::outbox::{self, OutboxEvent};
use thera_lc::route::{NewGoal, NewRoute, Route};
use thera_lc::AppState;
use uuid::Uuid;

pub const ACTOR: &str = "specialist-1";

/// Create app state over a fresh database
///
/// Returns (TempDir, AppState) - TempDir must be kept alive for duration of test
pub async fn create_test_state() -> (TempDir, AppState) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("thera.db");
    let pool = init_database(&db_path).await.unwrap();
    let state = AppState::new(pool, &LifecycleConfig::default());
    (temp_dir, state)
}

pub fn new_route(child_id: &str) -> NewRoute {
    NewRoute {
        child_id: child_id.to_string(),
        lead_specialist_id: ACTOR.to_string(),
        title: "Speech development plan".to_string(),
        plan_horizon_weeks: 12,
    }
}

pub fn new_goal(title: &str) -> NewGoal {
    NewGoal {
        domain: "speech".to_string(),
        title: title.to_string(),
        priority: Default::default(),
        target_date: None,
        expected_version: None,
    }
}

/// Draft route owning one goal
pub async fn route_with_goal(state: &AppState, child_id: &str) -> Route {
    let route = state.routes.create(&new_route(child_id), ACTOR).await.unwrap();
    state
        .routes
        .create_goal(route.id, &new_goal("Say 20 words"), ACTOR)
        .await
        .unwrap();
    state.routes.get(route.id).await.unwrap()
}

/// Active route owning one goal
pub async fn active_route(state: &AppState, child_id: &str) -> Route {
    let route = route_with_goal(state, child_id).await;
    state.routes.activate(route.id, ACTOR).await.unwrap()
}

pub fn new_assignment(child_id: &str, planned_start_date: DateTime<Utc>) -> NewAssignment {
    NewAssignment {
        child_id: child_id.to_string(),
        specialist_id: ACTOR.to_string(),
        route_id: None,
        phase_id: None,
        goal_id: None,
        exercise_id: None,
        title: "Articulation drill".to_string(),
        description: None,
        planned_start_date,
        duration_minutes: 30,
        notes: None,
    }
}

/// Scheduled assignment planned for tomorrow
pub async fn scheduled_assignment(state: &AppState, child_id: &str, route_id: Option<Uuid>) -> Assignment {
    let mut input = new_assignment(child_id, Utc::now() + Duration::days(1));
    input.route_id = route_id;
    state.assignments.create(&input, ACTOR).await.unwrap()
}

pub async fn events_for(state: &AppState, aggregate_id: Uuid) -> Vec<OutboxEvent> {
    outbox::events_for_aggregate(&state.db, aggregate_id).await.unwrap()
}

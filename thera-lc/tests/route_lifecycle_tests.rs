//! Integration tests for the route state machine
//!
//! Tests cover:
//! - Activation guards (no goals, another active route for the child)
//! - Single active route per child under parallel activation
//! - Completion blocked by open assignments
//! - Goal/phase mutations with revisions and version bumps
//! - Optimistic version checks

mod helpers;

use helpers::*;
use thera_lc::assignment::AssignmentStatus;
use thera_lc::route::{GoalPriority, GoalUpdate, NewPhase, PhaseUpdate, RouteStatus, RouteUpdate};
use thera_lc::validation::MAX_ORDER_INDEX;
use thera_lc::Error;
use tokio::task::JoinSet;

fn phase(title: &str, order_index: Option<i64>) -> NewPhase {
    NewPhase {
        title: title.to_string(),
        order_index,
        duration_weeks: 4,
        expected_version: None,
    }
}

// =============================================================================
// Activation
// =============================================================================

#[tokio::test]
async fn test_activate_without_goals_is_empty_route() {
    let (_dir, state) = create_test_state().await;
    let route = state.routes.create(&new_route("C1"), ACTOR).await.unwrap();

    let err = state.routes.activate(route.id, ACTOR).await.unwrap_err();
    assert!(matches!(err, Error::EmptyRoute { route_id } if route_id == route.id));

    let stored = state.routes.get(route.id).await.unwrap();
    assert_eq!(stored.status, RouteStatus::Draft);
    assert!(stored.activated_at.is_none());

    let events = events_for(&state, route.id).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_name, "routes.route.created");
}

#[tokio::test]
async fn test_activate_emits_event_and_revision() {
    let (_dir, state) = create_test_state().await;
    let route = route_with_goal(&state, "C1").await;

    let active = state.routes.activate(route.id, ACTOR).await.unwrap();
    assert_eq!(active.status, RouteStatus::Active);
    assert!(active.activated_at.is_some());
    assert_eq!(active.version, route.version + 1);

    let events = events_for(&state, route.id).await;
    let last = events.last().unwrap();
    assert_eq!(last.event_name, "routes.route.activated");
    assert_eq!(last.payload["oldStatus"], "draft");
    assert_eq!(last.payload["newStatus"], "active");

    let revisions = state.routes.revisions(route.id).await.unwrap();
    let last = revisions.last().unwrap();
    assert_eq!(last.version, active.version);
    assert_eq!(last.changes["status"]["from"], "draft");
    assert_eq!(last.changes["status"]["to"], "active");
}

#[tokio::test]
async fn test_second_active_route_conflicts() {
    let (_dir, state) = create_test_state().await;
    let r1 = active_route(&state, "C1").await;
    let r2 = route_with_goal(&state, "C1").await;

    let err = state.routes.activate(r2.id, ACTOR).await.unwrap_err();
    match err {
        Error::ActiveRouteConflict {
            child_id,
            active_route_id,
        } => {
            assert_eq!(child_id, "C1");
            assert_eq!(active_route_id, Some(r1.id));
        }
        other => panic!("expected ActiveRouteConflict, got {:?}", other),
    }
    assert_eq!(
        state.routes.get(r2.id).await.unwrap().status,
        RouteStatus::Draft
    );

    // Other children are unaffected
    active_route(&state, "C2").await;
}

#[tokio::test]
async fn test_pause_frees_slot_and_resume_conflicts() {
    let (_dir, state) = create_test_state().await;
    let r1 = active_route(&state, "C1").await;
    state.routes.pause(r1.id, ACTOR).await.unwrap();

    let r2 = route_with_goal(&state, "C1").await;
    state.routes.activate(r2.id, ACTOR).await.unwrap();

    let err = state.routes.activate(r1.id, ACTOR).await.unwrap_err();
    assert!(matches!(err, Error::ActiveRouteConflict { .. }));
    assert_eq!(
        state.routes.get(r1.id).await.unwrap().status,
        RouteStatus::Paused
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_activation_allows_one_winner() {
    let (_dir, state) = create_test_state().await;

    let mut routes = Vec::new();
    for _ in 0..6 {
        routes.push(route_with_goal(&state, "C1").await);
    }

    let mut join_set = JoinSet::new();
    for route in &routes {
        let state = state.clone();
        let id = route.id;
        join_set.spawn(async move { state.routes.activate(id, ACTOR).await });
    }

    let mut successes = 0;
    let mut conflicts = 0;
    while let Some(result) = join_set.join_next().await {
        match result.unwrap() {
            Ok(_) => successes += 1,
            Err(Error::ActiveRouteConflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(conflicts, routes.len() - 1);

    let active: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM routes WHERE child_id = 'C1' AND status = 'active'",
    )
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(active, 1);

    let activated_events: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM outbox_events WHERE event_name = 'routes.route.activated'",
    )
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(activated_events, 1);
}

#[tokio::test]
async fn test_transition_table_enforced() {
    let (_dir, state) = create_test_state().await;
    let route = route_with_goal(&state, "C1").await;

    let err = state.routes.complete(route.id, ACTOR).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    let err = state.routes.pause(route.id, ACTOR).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    state.routes.archive(route.id, ACTOR).await.unwrap();
    let err = state.routes.activate(route.id, ACTOR).await.unwrap_err();
    match err {
        Error::InvalidTransition { from, to, .. } => {
            assert_eq!(from, "archived");
            assert_eq!(to, "active");
        }
        other => panic!("expected InvalidTransition, got {:?}", other),
    }
}

// =============================================================================
// Completion
// =============================================================================

#[tokio::test]
async fn test_complete_blocked_by_open_assignments() {
    let (_dir, state) = create_test_state().await;
    let route = active_route(&state, "C1").await;
    let a1 = scheduled_assignment(&state, "C1", Some(route.id)).await;
    let a2 = scheduled_assignment(&state, "C1", Some(route.id)).await;

    let err = state.routes.complete(route.id, ACTOR).await.unwrap_err();
    assert!(matches!(
        err,
        Error::OpenAssignmentsExist {
            open_assignments: 2,
            ..
        }
    ));

    state
        .assignments
        .transition(a1.id, AssignmentStatus::InProgress, ACTOR, None)
        .await
        .unwrap();
    state
        .assignments
        .transition(a2.id, AssignmentStatus::Skipped, ACTOR, None)
        .await
        .unwrap();

    let err = state.routes.complete(route.id, ACTOR).await.unwrap_err();
    assert!(matches!(
        err,
        Error::OpenAssignmentsExist {
            open_assignments: 1,
            ..
        }
    ));
    assert_eq!(
        state.routes.get(route.id).await.unwrap().status,
        RouteStatus::Active
    );

    state
        .assignments
        .transition(a1.id, AssignmentStatus::Completed, ACTOR, None)
        .await
        .unwrap();

    let completed = state.routes.complete(route.id, ACTOR).await.unwrap();
    assert_eq!(completed.status, RouteStatus::Completed);
    assert!(completed.completed_at.is_some());

    let events = events_for(&state, route.id).await;
    assert_eq!(events.last().unwrap().event_name, "routes.route.completed");
}

#[tokio::test]
async fn test_overdue_assignments_do_not_block_completion() {
    let (_dir, state) = create_test_state().await;
    let route = active_route(&state, "C1").await;
    let a1 = scheduled_assignment(&state, "C1", Some(route.id)).await;
    state
        .assignments
        .transition(a1.id, AssignmentStatus::Overdue, ACTOR, None)
        .await
        .unwrap();

    state.routes.complete(route.id, ACTOR).await.unwrap();
}

// =============================================================================
// Goals and phases
// =============================================================================

#[tokio::test]
async fn test_goal_mutations_bump_version_and_record_revisions() {
    let (_dir, state) = create_test_state().await;
    let route = state.routes.create(&new_route("C1"), ACTOR).await.unwrap();
    assert_eq!(route.version, 1);

    let goal = state
        .routes
        .create_goal(route.id, &new_goal("Say 20 words"), ACTOR)
        .await
        .unwrap();
    let update = GoalUpdate {
        priority: Some(GoalPriority::High),
        ..Default::default()
    };
    let updated = state
        .routes
        .update_goal(route.id, goal.id, &update, ACTOR)
        .await
        .unwrap();
    assert_eq!(updated.priority, GoalPriority::High);

    let removed = state
        .routes
        .delete_goal(route.id, goal.id, None, ACTOR)
        .await
        .unwrap();
    assert_eq!(removed.version, 4);

    let revisions = state.routes.revisions(route.id).await.unwrap();
    let versions: Vec<i64> = revisions.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);
    assert!(revisions[0].changes.get("created").is_some());
    assert_eq!(revisions[1].changes["goalAdded"]["title"], "Say 20 words");
    assert_eq!(
        revisions[2].changes["goalUpdated"]["fields"]["priority"]["to"],
        "high"
    );
    assert_eq!(revisions[3].changes["goalRemoved"]["id"], goal.id.to_string());
    assert!(revisions.iter().all(|r| r.changed_by == ACTOR));

    let updated_events = events_for(&state, route.id)
        .await
        .into_iter()
        .filter(|e| e.event_name == "routes.route.updated")
        .count();
    assert_eq!(updated_events, 3);
}

#[tokio::test]
async fn test_last_goal_of_active_route_cannot_be_removed() {
    let (_dir, state) = create_test_state().await;
    let route = active_route(&state, "C1").await;
    let detail = state.routes.get_detail(route.id).await.unwrap();
    let goal_id = detail.goals[0].id;

    let err = state
        .routes
        .delete_goal(route.id, goal_id, None, ACTOR)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyRoute { .. }));
    assert_eq!(state.routes.get_detail(route.id).await.unwrap().goals.len(), 1);
}

#[tokio::test]
async fn test_referenced_goal_cannot_be_removed() {
    let (_dir, state) = create_test_state().await;
    let route = active_route(&state, "C1").await;
    let extra = state
        .routes
        .create_goal(route.id, &new_goal("Follow two-step instructions"), ACTOR)
        .await
        .unwrap();

    let mut input = new_assignment("C1", chrono::Utc::now() + chrono::Duration::days(1));
    input.route_id = Some(route.id);
    input.goal_id = Some(extra.id);
    state.assignments.create(&input, ACTOR).await.unwrap();

    let err = state
        .routes
        .delete_goal(route.id, extra.id, None, ACTOR)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InUse { entity: "goal", assignments: 1, .. }));
}

#[tokio::test]
async fn test_phases_append_in_order() {
    let (_dir, state) = create_test_state().await;
    let route = route_with_goal(&state, "C1").await;

    let first = state
        .routes
        .create_phase(route.id, &phase("Assessment", None), ACTOR)
        .await
        .unwrap();
    let second = state
        .routes
        .create_phase(route.id, &phase("Practice", None), ACTOR)
        .await
        .unwrap();
    assert_eq!(first.order_index, 0);
    assert_eq!(second.order_index, 1);

    let update = PhaseUpdate {
        order_index: Some(5),
        ..Default::default()
    };
    state
        .routes
        .update_phase(route.id, first.id, &update, ACTOR)
        .await
        .unwrap();

    let detail = state.routes.get_detail(route.id).await.unwrap();
    let titles: Vec<&str> = detail.phases.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, vec!["Practice", "Assessment"]);

    state
        .routes
        .delete_phase(route.id, second.id, None, ACTOR)
        .await
        .unwrap();
    assert_eq!(state.routes.get_detail(route.id).await.unwrap().phases.len(), 1);
}

#[tokio::test]
async fn test_phase_order_index_bounded() {
    let (_dir, state) = create_test_state().await;
    let route = route_with_goal(&state, "C1").await;

    let err = state
        .routes
        .create_phase(route.id, &phase("Far away", Some(i64::MAX)), ACTOR)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {:?}", err);

    let last = state
        .routes
        .create_phase(route.id, &phase("Last", Some(MAX_ORDER_INDEX)), ACTOR)
        .await
        .unwrap();
    assert_eq!(last.order_index, MAX_ORDER_INDEX);

    // No room left to append after the last slot
    let err = state
        .routes
        .create_phase(route.id, &phase("Appended", None), ACTOR)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {:?}", err);

    assert_eq!(state.routes.get_detail(route.id).await.unwrap().phases.len(), 1);
    assert_eq!(state.routes.get(route.id).await.unwrap().version, route.version + 1);
}

#[tokio::test]
async fn test_completed_route_is_structurally_immutable() {
    let (_dir, state) = create_test_state().await;
    let route = active_route(&state, "C1").await;
    let completed = state.routes.complete(route.id, ACTOR).await.unwrap();

    let err = state
        .routes
        .create_goal(route.id, &new_goal("Late goal"), ACTOR)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RouteImmutable { .. }));

    let err = state
        .routes
        .create_phase(route.id, &phase("Late phase", None), ACTOR)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RouteImmutable { .. }));

    assert_eq!(
        state.routes.get(route.id).await.unwrap().version,
        completed.version
    );
}

// =============================================================================
// Descriptive updates and versions
// =============================================================================

#[tokio::test]
async fn test_stale_version_rejected() {
    let (_dir, state) = create_test_state().await;
    let route = route_with_goal(&state, "C1").await;
    assert_eq!(route.version, 2);

    let stale = RouteUpdate {
        title: Some("Renamed".to_string()),
        expected_version: Some(1),
        ..Default::default()
    };
    let err = state.routes.update(route.id, &stale, ACTOR).await.unwrap_err();
    assert!(matches!(
        err,
        Error::StaleVersion {
            expected: 1,
            actual: 2,
            ..
        }
    ));

    let current = RouteUpdate {
        title: Some("Renamed".to_string()),
        expected_version: Some(2),
        ..Default::default()
    };
    let updated = state.routes.update(route.id, &current, ACTOR).await.unwrap();
    assert_eq!(updated.title, "Renamed");
    assert_eq!(updated.version, 3);
}

#[tokio::test]
async fn test_noop_update_keeps_version() {
    let (_dir, state) = create_test_state().await;
    let route = route_with_goal(&state, "C1").await;

    let same = RouteUpdate {
        plan_horizon_weeks: Some(route.plan_horizon_weeks),
        ..Default::default()
    };
    let unchanged = state.routes.update(route.id, &same, ACTOR).await.unwrap();
    assert_eq!(unchanged.version, route.version);
    assert_eq!(
        state.routes.revisions(route.id).await.unwrap().len() as i64,
        route.version
    );
}

#[tokio::test]
async fn test_every_mutation_pairs_revision_with_event() {
    let (_dir, state) = create_test_state().await;
    let route = active_route(&state, "C1").await;
    state.routes.pause(route.id, ACTOR).await.unwrap();
    state.routes.archive(route.id, ACTOR).await.unwrap();

    let revisions = state.routes.revisions(route.id).await.unwrap();
    let events = events_for(&state, route.id).await;
    assert_eq!(revisions.len(), events.len());

    let names: Vec<&str> = events.iter().map(|e| e.event_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "routes.route.created",
            "routes.route.updated",
            "routes.route.activated",
            "routes.route.paused",
            "routes.route.archived",
        ]
    );
}

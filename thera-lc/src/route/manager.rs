//! Route lifecycle manager
//!
//! Every mutation runs in one transaction that starts by locking the route
//! row, re-checks its invariants against committed state, bumps the route
//! version, appends a revision and publishes exactly one outbox event.

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use thera_common::{time, uuid_utils};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    store, Goal, GoalUpdate, NewGoal, NewPhase, NewRoute, Phase, PhaseUpdate, Route, RouteDetail,
    RouteStatus, RouteUpdate,
};
use crate::assignment;
use crate::db::{is_unique_violation_on, retry_on_lock};
use crate::error::{Error, Result};
use crate::outbox::{self, EventName, NewEvent};
use crate::revision::{self, Changes, RouteRevision};
use crate::validation;

const ACTIVE_ROUTE_INDEX_COLUMNS: &str = "routes.child_id";

/// Owns the route state machine and its goals and phases
#[derive(Clone)]
pub struct RouteManager {
    db: SqlitePool,
    max_lock_wait_ms: u64,
}

impl RouteManager {
    pub fn new(db: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            max_lock_wait_ms,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get(&self, id: Uuid) -> Result<Route> {
        store::fetch(&self.db, id)
            .await?
            .ok_or(Error::NotFound { entity: "route", id })
    }

    /// Route with goals and ordered phases
    pub async fn get_detail(&self, id: Uuid) -> Result<RouteDetail> {
        let route = self.get(id).await?;
        let goals = store::goals(&self.db, id).await?;
        let phases = store::phases(&self.db, id).await?;
        Ok(RouteDetail {
            route,
            goals,
            phases,
        })
    }

    pub async fn list_for_child(&self, child_id: &str) -> Result<Vec<Route>> {
        store::list_for_child(&self.db, child_id).await
    }

    pub async fn revisions(&self, id: Uuid) -> Result<Vec<RouteRevision>> {
        self.get(id).await?;
        revision::list(&self.db, id).await
    }

    // ========================================================================
    // Creation and descriptive edits
    // ========================================================================

    /// Create a draft route at version 1
    pub async fn create(&self, input: &NewRoute, actor: &str) -> Result<Route> {
        let actor = validation::reference_id("actorId", actor)?;
        let now = time::now();
        let route = Route {
            id: uuid_utils::generate(),
            status: RouteStatus::Draft,
            child_id: validation::reference_id("childId", &input.child_id)?,
            lead_specialist_id: validation::reference_id(
                "leadSpecialistId",
                &input.lead_specialist_id,
            )?,
            title: validation::title("title", &input.title)?,
            plan_horizon_weeks: validation::plan_horizon_weeks(input.plan_horizon_weeks)?,
            version: 1,
            activated_at: None,
            completed_at: None,
            archived_at: None,
            created_at: now,
            updated_at: now,
        };

        retry_on_lock("route.create", self.max_lock_wait_ms, || {
            self.try_create(&route, &actor)
        })
        .await?;

        info!(
            route_id = %route.id,
            child_id = %route.child_id,
            actor = %actor,
            "Route created"
        );
        Ok(route)
    }

    async fn try_create(&self, route: &Route, actor: &str) -> Result<()> {
        let mut tx = self.db.begin().await?;

        store::insert(&mut tx, route).await?;

        let mut changes = Changes::new();
        changes.entry("created", serde_json::to_value(route)?);
        revision::record(&mut tx, route.id, route.version, &changes, actor, route.created_at)
            .await?;

        outbox::publish(
            &mut tx,
            NewEvent {
                name: EventName::RouteCreated,
                aggregate_id: route.id,
                actor_id: actor,
                payload: json!({
                    "routeId": route.id,
                    "childId": route.child_id,
                    "leadSpecialistId": route.lead_specialist_id,
                    "title": route.title,
                    "status": route.status,
                    "version": route.version,
                    "actorId": actor,
                }),
            },
            route.created_at,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Edit title, lead specialist or horizon of a non-terminal route
    ///
    /// An update that changes nothing is a no-op: no version bump, revision
    /// or event.
    pub async fn update(&self, id: Uuid, input: &RouteUpdate, actor: &str) -> Result<Route> {
        let actor = validation::reference_id("actorId", actor)?;
        let title = input
            .title
            .as_deref()
            .map(|t| validation::title("title", t))
            .transpose()?;
        let lead = input
            .lead_specialist_id
            .as_deref()
            .map(|l| validation::reference_id("leadSpecialistId", l))
            .transpose()?;
        let horizon = input
            .plan_horizon_weeks
            .map(validation::plan_horizon_weeks)
            .transpose()?;

        retry_on_lock("route.update", self.max_lock_wait_ms, || {
            self.try_update(
                id,
                title.as_deref(),
                lead.as_deref(),
                horizon,
                input.expected_version,
                &actor,
            )
        })
        .await
    }

    async fn try_update(
        &self,
        id: Uuid,
        title: Option<&str>,
        lead: Option<&str>,
        horizon: Option<i64>,
        expected_version: Option<i64>,
        actor: &str,
    ) -> Result<Route> {
        let mut tx = self.db.begin().await?;
        let mut route = lock_editable(&mut tx, id, expected_version).await?;

        let mut changes = Changes::new();
        if let Some(title) = title {
            changes.field("title", &route.title.as_str(), &title);
            route.title = title.to_string();
        }
        if let Some(lead) = lead {
            changes.field("leadSpecialistId", &route.lead_specialist_id.as_str(), &lead);
            route.lead_specialist_id = lead.to_string();
        }
        if let Some(horizon) = horizon {
            changes.field("planHorizonWeeks", &route.plan_horizon_weeks, &horizon);
            route.plan_horizon_weeks = horizon;
        }

        if changes.is_empty() {
            tx.rollback().await?;
            return Ok(route);
        }

        let now = time::now();
        record_mutation(&mut tx, &mut route, &changes, actor, now).await?;
        publish_updated(&mut tx, &route, &changes, actor, now).await?;
        tx.commit().await?;

        info!(route_id = %id, version = route.version, actor = %actor, "Route updated");
        Ok(route)
    }

    // ========================================================================
    // Status transitions
    // ========================================================================

    /// Draft or paused route becomes the child's active route
    ///
    /// Rejected with `EmptyRoute` when the route owns no goals and with
    /// `ActiveRouteConflict` when another route of the child is active.
    pub async fn activate(&self, id: Uuid, actor: &str) -> Result<Route> {
        self.transition(id, RouteStatus::Active, actor).await
    }

    /// Active route closes; rejected while open assignments reference it
    pub async fn complete(&self, id: Uuid, actor: &str) -> Result<Route> {
        self.transition(id, RouteStatus::Completed, actor).await
    }

    pub async fn pause(&self, id: Uuid, actor: &str) -> Result<Route> {
        self.transition(id, RouteStatus::Paused, actor).await
    }

    /// Soft delete; archived routes never change again
    pub async fn archive(&self, id: Uuid, actor: &str) -> Result<Route> {
        self.transition(id, RouteStatus::Archived, actor).await
    }

    async fn transition(&self, id: Uuid, target: RouteStatus, actor: &str) -> Result<Route> {
        let actor = validation::reference_id("actorId", actor)?;
        let operation = match target {
            RouteStatus::Active => "route.activate",
            RouteStatus::Completed => "route.complete",
            RouteStatus::Paused => "route.pause",
            _ => "route.archive",
        };

        retry_on_lock(operation, self.max_lock_wait_ms, || {
            self.try_transition(id, target, &actor)
        })
        .await
    }

    async fn try_transition(&self, id: Uuid, target: RouteStatus, actor: &str) -> Result<Route> {
        let mut tx = self.db.begin().await?;

        store::lock(&mut tx, id).await?;
        let mut route = store::fetch(&mut *tx, id)
            .await?
            .ok_or(Error::NotFound { entity: "route", id })?;
        let from = route.status;

        if !from.can_transition_to(target) {
            return Err(Error::InvalidTransition {
                entity: "route",
                id,
                from: from.to_string(),
                to: target.to_string(),
            });
        }

        match target {
            RouteStatus::Active => {
                if store::count_goals(&mut tx, id).await? == 0 {
                    warn!(route_id = %id, "Activation rejected: route has no goals");
                    return Err(Error::EmptyRoute { route_id: id });
                }
                if let Some(active_id) =
                    store::active_route_for_child(&mut tx, &route.child_id, id).await?
                {
                    warn!(
                        route_id = %id,
                        child_id = %route.child_id,
                        active_route_id = %active_id,
                        "Activation rejected: child already has an active route"
                    );
                    return Err(Error::ActiveRouteConflict {
                        child_id: route.child_id,
                        active_route_id: Some(active_id),
                    });
                }
            }
            RouteStatus::Completed => {
                let open = assignment::store::count_open_for_route(&mut tx, id).await?;
                if open > 0 {
                    warn!(
                        route_id = %id,
                        open_assignments = open,
                        "Completion rejected: route has open assignments"
                    );
                    return Err(Error::OpenAssignmentsExist {
                        route_id: id,
                        open_assignments: open,
                    });
                }
            }
            _ => {}
        }

        let now = time::now();
        route.status = target;
        match target {
            RouteStatus::Active => route.activated_at = Some(now),
            RouteStatus::Completed => route.completed_at = Some(now),
            RouteStatus::Archived => route.archived_at = Some(now),
            _ => {}
        }

        let mut changes = Changes::new();
        changes.field("status", &from, &target);
        record_mutation(&mut tx, &mut route, &changes, actor, now).await?;

        let name = match target {
            RouteStatus::Active => EventName::RouteActivated,
            RouteStatus::Completed => EventName::RouteCompleted,
            RouteStatus::Paused => EventName::RoutePaused,
            _ => EventName::RouteArchived,
        };
        outbox::publish(
            &mut tx,
            NewEvent {
                name,
                aggregate_id: id,
                actor_id: actor,
                payload: json!({
                    "routeId": id,
                    "childId": route.child_id,
                    "oldStatus": from,
                    "newStatus": target,
                    "version": route.version,
                    "actorId": actor,
                }),
            },
            now,
        )
        .await?;

        tx.commit().await?;

        info!(
            route_id = %id,
            child_id = %route.child_id,
            old_status = %from,
            new_status = %target,
            version = route.version,
            actor = %actor,
            "Route status changed"
        );
        Ok(route)
    }

    // ========================================================================
    // Goals
    // ========================================================================

    pub async fn create_goal(&self, route_id: Uuid, input: &NewGoal, actor: &str) -> Result<Goal> {
        let actor = validation::reference_id("actorId", actor)?;
        let goal = Goal {
            id: uuid_utils::generate(),
            route_id,
            domain: validation::title("domain", &input.domain)?,
            title: validation::title("title", &input.title)?,
            priority: input.priority,
            target_date: input.target_date,
        };

        retry_on_lock("route.create_goal", self.max_lock_wait_ms, || {
            self.try_create_goal(&goal, input.expected_version, &actor)
        })
        .await?;

        Ok(goal)
    }

    async fn try_create_goal(
        &self,
        goal: &Goal,
        expected_version: Option<i64>,
        actor: &str,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let mut route = lock_editable(&mut tx, goal.route_id, expected_version).await?;
        let now = time::now();

        store::insert_goal(&mut tx, goal, now).await?;

        let mut changes = Changes::new();
        changes.entry("goalAdded", serde_json::to_value(goal)?);
        record_mutation(&mut tx, &mut route, &changes, actor, now).await?;
        publish_updated(&mut tx, &route, &changes, actor, now).await?;
        tx.commit().await?;

        info!(route_id = %route.id, goal_id = %goal.id, version = route.version, "Goal added");
        Ok(())
    }

    pub async fn update_goal(
        &self,
        route_id: Uuid,
        goal_id: Uuid,
        input: &GoalUpdate,
        actor: &str,
    ) -> Result<Goal> {
        let actor = validation::reference_id("actorId", actor)?;
        let domain = input
            .domain
            .as_deref()
            .map(|d| validation::title("domain", d))
            .transpose()?;
        let title = input
            .title
            .as_deref()
            .map(|t| validation::title("title", t))
            .transpose()?;

        retry_on_lock("route.update_goal", self.max_lock_wait_ms, || {
            self.try_update_goal(
                route_id,
                goal_id,
                domain.as_deref(),
                title.as_deref(),
                input,
                &actor,
            )
        })
        .await
    }

    async fn try_update_goal(
        &self,
        route_id: Uuid,
        goal_id: Uuid,
        domain: Option<&str>,
        title: Option<&str>,
        input: &GoalUpdate,
        actor: &str,
    ) -> Result<Goal> {
        let mut tx = self.db.begin().await?;
        let mut route = lock_editable(&mut tx, route_id, input.expected_version).await?;
        let mut goal = store::fetch_goal(&mut *tx, route_id, goal_id)
            .await?
            .ok_or(Error::NotFound {
                entity: "goal",
                id: goal_id,
            })?;

        let mut diff = Changes::new();
        if let Some(domain) = domain {
            diff.field("domain", &goal.domain.as_str(), &domain);
            goal.domain = domain.to_string();
        }
        if let Some(title) = title {
            diff.field("title", &goal.title.as_str(), &title);
            goal.title = title.to_string();
        }
        if let Some(priority) = input.priority {
            diff.field("priority", &goal.priority, &priority);
            goal.priority = priority;
        }
        if let Some(target_date) = input.target_date {
            diff.field("targetDate", &goal.target_date, &Some(target_date));
            goal.target_date = Some(target_date);
        }

        if diff.is_empty() {
            tx.rollback().await?;
            return Ok(goal);
        }

        let now = time::now();
        store::save_goal(&mut tx, &goal, now).await?;

        let mut changes = Changes::new();
        changes.entry(
            "goalUpdated",
            json!({ "goalId": goal_id, "fields": diff.as_value() }),
        );
        record_mutation(&mut tx, &mut route, &changes, actor, now).await?;
        publish_updated(&mut tx, &route, &changes, actor, now).await?;
        tx.commit().await?;

        info!(route_id = %route_id, goal_id = %goal_id, version = route.version, "Goal updated");
        Ok(goal)
    }

    /// Remove a goal
    ///
    /// Rejected with `InUse` while assignments reference the goal, and with
    /// `EmptyRoute` when it is the last goal of an active or paused route.
    pub async fn delete_goal(
        &self,
        route_id: Uuid,
        goal_id: Uuid,
        expected_version: Option<i64>,
        actor: &str,
    ) -> Result<Route> {
        let actor = validation::reference_id("actorId", actor)?;

        retry_on_lock("route.delete_goal", self.max_lock_wait_ms, || {
            self.try_delete_goal(route_id, goal_id, expected_version, &actor)
        })
        .await
    }

    async fn try_delete_goal(
        &self,
        route_id: Uuid,
        goal_id: Uuid,
        expected_version: Option<i64>,
        actor: &str,
    ) -> Result<Route> {
        let mut tx = self.db.begin().await?;
        let mut route = lock_editable(&mut tx, route_id, expected_version).await?;
        let goal = store::fetch_goal(&mut *tx, route_id, goal_id)
            .await?
            .ok_or(Error::NotFound {
                entity: "goal",
                id: goal_id,
            })?;

        let referencing = assignment::store::count_referencing(&mut tx, "goal_id", goal_id).await?;
        if referencing > 0 {
            return Err(Error::InUse {
                entity: "goal",
                id: goal_id,
                assignments: referencing,
            });
        }
        if route.status.requires_goals() && store::count_goals(&mut tx, route_id).await? <= 1 {
            warn!(route_id = %route_id, goal_id = %goal_id, "Refusing to remove last goal of live route");
            return Err(Error::EmptyRoute { route_id });
        }

        let now = time::now();
        store::delete_goal(&mut tx, goal_id).await?;

        let mut changes = Changes::new();
        changes.entry("goalRemoved", serde_json::to_value(&goal)?);
        record_mutation(&mut tx, &mut route, &changes, actor, now).await?;
        publish_updated(&mut tx, &route, &changes, actor, now).await?;
        tx.commit().await?;

        info!(route_id = %route_id, goal_id = %goal_id, version = route.version, "Goal removed");
        Ok(route)
    }

    // ========================================================================
    // Phases
    // ========================================================================

    pub async fn create_phase(
        &self,
        route_id: Uuid,
        input: &NewPhase,
        actor: &str,
    ) -> Result<Phase> {
        let actor = validation::reference_id("actorId", actor)?;
        let title = validation::title("title", &input.title)?;
        let duration_weeks = validation::phase_duration_weeks(input.duration_weeks)?;
        let order_index = input.order_index.map(validation::order_index).transpose()?;

        retry_on_lock("route.create_phase", self.max_lock_wait_ms, || {
            self.try_create_phase(
                route_id,
                &title,
                order_index,
                duration_weeks,
                input.expected_version,
                &actor,
            )
        })
        .await
    }

    async fn try_create_phase(
        &self,
        route_id: Uuid,
        title: &str,
        order_index: Option<i64>,
        duration_weeks: i64,
        expected_version: Option<i64>,
        actor: &str,
    ) -> Result<Phase> {
        let mut tx = self.db.begin().await?;
        let mut route = lock_editable(&mut tx, route_id, expected_version).await?;
        let now = time::now();

        let order_index = match order_index {
            Some(index) => index,
            None => store::next_phase_index(&mut tx, route_id).await?,
        };
        let phase = Phase {
            id: uuid_utils::generate(),
            route_id,
            title: title.to_string(),
            order_index,
            duration_weeks,
        };
        store::insert_phase(&mut tx, &phase, now).await?;

        let mut changes = Changes::new();
        changes.entry("phaseAdded", serde_json::to_value(&phase)?);
        record_mutation(&mut tx, &mut route, &changes, actor, now).await?;
        publish_updated(&mut tx, &route, &changes, actor, now).await?;
        tx.commit().await?;

        info!(route_id = %route_id, phase_id = %phase.id, version = route.version, "Phase added");
        Ok(phase)
    }

    pub async fn update_phase(
        &self,
        route_id: Uuid,
        phase_id: Uuid,
        input: &PhaseUpdate,
        actor: &str,
    ) -> Result<Phase> {
        let actor = validation::reference_id("actorId", actor)?;
        let title = input
            .title
            .as_deref()
            .map(|t| validation::title("title", t))
            .transpose()?;
        let order_index = input.order_index.map(validation::order_index).transpose()?;
        let duration_weeks = input
            .duration_weeks
            .map(validation::phase_duration_weeks)
            .transpose()?;

        retry_on_lock("route.update_phase", self.max_lock_wait_ms, || {
            self.try_update_phase(
                route_id,
                phase_id,
                title.as_deref(),
                order_index,
                duration_weeks,
                input.expected_version,
                &actor,
            )
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_update_phase(
        &self,
        route_id: Uuid,
        phase_id: Uuid,
        title: Option<&str>,
        order_index: Option<i64>,
        duration_weeks: Option<i64>,
        expected_version: Option<i64>,
        actor: &str,
    ) -> Result<Phase> {
        let mut tx = self.db.begin().await?;
        let mut route = lock_editable(&mut tx, route_id, expected_version).await?;
        let mut phase = store::fetch_phase(&mut *tx, route_id, phase_id)
            .await?
            .ok_or(Error::NotFound {
                entity: "phase",
                id: phase_id,
            })?;

        let mut diff = Changes::new();
        if let Some(title) = title {
            diff.field("title", &phase.title.as_str(), &title);
            phase.title = title.to_string();
        }
        if let Some(order_index) = order_index {
            diff.field("orderIndex", &phase.order_index, &order_index);
            phase.order_index = order_index;
        }
        if let Some(duration_weeks) = duration_weeks {
            diff.field("durationWeeks", &phase.duration_weeks, &duration_weeks);
            phase.duration_weeks = duration_weeks;
        }

        if diff.is_empty() {
            tx.rollback().await?;
            return Ok(phase);
        }

        let now = time::now();
        store::save_phase(&mut tx, &phase, now).await?;

        let mut changes = Changes::new();
        changes.entry(
            "phaseUpdated",
            json!({ "phaseId": phase_id, "fields": diff.as_value() }),
        );
        record_mutation(&mut tx, &mut route, &changes, actor, now).await?;
        publish_updated(&mut tx, &route, &changes, actor, now).await?;
        tx.commit().await?;

        info!(route_id = %route_id, phase_id = %phase_id, version = route.version, "Phase updated");
        Ok(phase)
    }

    /// Remove a phase; rejected with `InUse` while assignments reference it
    pub async fn delete_phase(
        &self,
        route_id: Uuid,
        phase_id: Uuid,
        expected_version: Option<i64>,
        actor: &str,
    ) -> Result<Route> {
        let actor = validation::reference_id("actorId", actor)?;

        retry_on_lock("route.delete_phase", self.max_lock_wait_ms, || {
            self.try_delete_phase(route_id, phase_id, expected_version, &actor)
        })
        .await
    }

    async fn try_delete_phase(
        &self,
        route_id: Uuid,
        phase_id: Uuid,
        expected_version: Option<i64>,
        actor: &str,
    ) -> Result<Route> {
        let mut tx = self.db.begin().await?;
        let mut route = lock_editable(&mut tx, route_id, expected_version).await?;
        let phase = store::fetch_phase(&mut *tx, route_id, phase_id)
            .await?
            .ok_or(Error::NotFound {
                entity: "phase",
                id: phase_id,
            })?;

        let referencing =
            assignment::store::count_referencing(&mut tx, "phase_id", phase_id).await?;
        if referencing > 0 {
            return Err(Error::InUse {
                entity: "phase",
                id: phase_id,
                assignments: referencing,
            });
        }

        let now = time::now();
        store::delete_phase(&mut tx, phase_id).await?;

        let mut changes = Changes::new();
        changes.entry("phaseRemoved", serde_json::to_value(&phase)?);
        record_mutation(&mut tx, &mut route, &changes, actor, now).await?;
        publish_updated(&mut tx, &route, &changes, actor, now).await?;
        tx.commit().await?;

        info!(route_id = %route_id, phase_id = %phase_id, version = route.version, "Phase removed");
        Ok(route)
    }
}

/// Lock a route for a structural or descriptive edit
///
/// Fails with `RouteImmutable` once completed or archived, and with
/// `StaleVersion` when the caller's expected version is outdated.
async fn lock_editable(
    conn: &mut SqliteConnection,
    id: Uuid,
    expected_version: Option<i64>,
) -> Result<Route> {
    store::lock(conn, id).await?;
    let route = store::fetch(&mut *conn, id)
        .await?
        .ok_or(Error::NotFound { entity: "route", id })?;

    if !route.status.is_editable() {
        return Err(Error::RouteImmutable {
            id,
            status: route.status.to_string(),
        });
    }
    if let Some(expected) = expected_version {
        if expected != route.version {
            warn!(
                route_id = %id,
                expected,
                actual = route.version,
                "Rejecting write against stale route version"
            );
            return Err(Error::StaleVersion {
                route_id: id,
                expected,
                actual: route.version,
            });
        }
    }
    Ok(route)
}

/// Bump the version, persist the route and append the matching revision
async fn record_mutation(
    conn: &mut SqliteConnection,
    route: &mut Route,
    changes: &Changes,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    route.version += 1;
    route.updated_at = now;

    match store::save(conn, route).await {
        Err(Error::Database(ref err)) if is_unique_violation_on(err, ACTIVE_ROUTE_INDEX_COLUMNS) => {
            warn!(
                route_id = %route.id,
                child_id = %route.child_id,
                "Active route index rejected activation"
            );
            return Err(Error::ActiveRouteConflict {
                child_id: route.child_id.clone(),
                active_route_id: None,
            });
        }
        other => other?,
    }

    revision::record(conn, route.id, route.version, changes, actor, now).await
}

async fn publish_updated(
    conn: &mut SqliteConnection,
    route: &Route,
    changes: &Changes,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    outbox::publish(
        conn,
        NewEvent {
            name: EventName::RouteUpdated,
            aggregate_id: route.id,
            actor_id: actor,
            payload: json!({
                "routeId": route.id,
                "childId": route.child_id,
                "version": route.version,
                "changes": changes.as_value(),
                "actorId": actor,
            }),
        },
        now,
    )
    .await?;
    Ok(())
}

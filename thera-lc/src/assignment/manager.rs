//! Assignment lifecycle manager

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::{SqliteConnection, SqlitePool};
use thera_common::{time, uuid_utils};
use tracing::{debug, info};
use uuid::Uuid;

use super::{store, Assignment, AssignmentFilter, AssignmentStatus, AssignmentUpdate, NewAssignment};
use crate::db::retry_on_lock;
use crate::error::{Error, Result};
use crate::outbox::{self, EventName, NewEvent};
use crate::revision::Changes;
use crate::route;
use crate::validation;

/// Owns the assignment state machine
#[derive(Clone)]
pub struct AssignmentManager {
    db: SqlitePool,
    max_lock_wait_ms: u64,
}

impl AssignmentManager {
    pub fn new(db: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            max_lock_wait_ms,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Assignment> {
        store::fetch(&self.db, id).await?.ok_or(Error::NotFound {
            entity: "assignment",
            id,
        })
    }

    pub async fn list(&self, filter: &AssignmentFilter) -> Result<Vec<Assignment>> {
        store::list(&self.db, filter).await
    }

    /// Schedule a new assignment
    ///
    /// A referenced route must belong to the same child and must not be
    /// completed or archived; a referenced phase or goal must belong to that
    /// route.
    pub async fn create(&self, input: &NewAssignment, actor: &str) -> Result<Assignment> {
        let actor = validation::reference_id("actorId", actor)?;
        if input.route_id.is_none() && (input.phase_id.is_some() || input.goal_id.is_some()) {
            return Err(Error::Validation(
                "phaseId and goalId require a routeId".to_string(),
            ));
        }

        let now = time::now();
        let assignment = Assignment {
            id: uuid_utils::generate(),
            status: AssignmentStatus::Scheduled,
            child_id: validation::reference_id("childId", &input.child_id)?,
            specialist_id: validation::reference_id("specialistId", &input.specialist_id)?,
            route_id: input.route_id,
            phase_id: input.phase_id,
            goal_id: input.goal_id,
            exercise_id: input
                .exercise_id
                .as_deref()
                .map(|e| validation::reference_id("exerciseId", e))
                .transpose()?,
            title: validation::title("title", &input.title)?,
            description: validation::optional_text("description", input.description.as_deref())?,
            planned_start_date: time::to_millis(input.planned_start_date),
            duration_minutes: validation::duration_minutes(input.duration_minutes)?,
            started_at: None,
            completed_at: None,
            notes: validation::optional_text("notes", input.notes.as_deref())?,
            created_at: now,
            updated_at: now,
        };

        retry_on_lock("assignment.create", self.max_lock_wait_ms, || {
            self.try_create(&assignment, &actor)
        })
        .await?;

        info!(
            assignment_id = %assignment.id,
            child_id = %assignment.child_id,
            route_id = ?assignment.route_id,
            actor = %actor,
            "Assignment scheduled"
        );
        Ok(assignment)
    }

    async fn try_create(&self, assignment: &Assignment, actor: &str) -> Result<()> {
        let mut tx = self.db.begin().await?;

        if let Some(route_id) = assignment.route_id {
            // Holding the route lock orders this insert against route completion
            route::store::lock(&mut tx, route_id).await?;
            check_route_reference(&mut tx, assignment, route_id).await?;
        }

        store::insert(&mut tx, assignment).await?;
        outbox::publish(
            &mut tx,
            NewEvent {
                name: EventName::AssignmentCreated,
                aggregate_id: assignment.id,
                actor_id: actor,
                payload: json!({
                    "assignmentId": assignment.id,
                    "assignment": assignment,
                    "actorId": actor,
                }),
            },
            assignment.created_at,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Move an assignment along the transition table
    ///
    /// Sets `startedAt` on the first entry into `in_progress` and
    /// `completedAt` on completion. Notes, when given, replace the stored
    /// notes.
    pub async fn transition(
        &self,
        id: Uuid,
        requested: AssignmentStatus,
        actor: &str,
        notes: Option<&str>,
    ) -> Result<Assignment> {
        let actor = validation::reference_id("actorId", actor)?;
        let notes = validation::optional_text("notes", notes)?;

        retry_on_lock("assignment.transition", self.max_lock_wait_ms, || {
            self.try_transition(id, requested, &actor, notes.as_deref())
        })
        .await
    }

    async fn try_transition(
        &self,
        id: Uuid,
        requested: AssignmentStatus,
        actor: &str,
        notes: Option<&str>,
    ) -> Result<Assignment> {
        let mut tx = self.db.begin().await?;

        store::lock(&mut tx, id).await?;
        let mut assignment = store::fetch(&mut *tx, id).await?.ok_or(Error::NotFound {
            entity: "assignment",
            id,
        })?;
        let from = assignment.status;

        if !from.can_transition_to(requested) {
            debug!(
                assignment_id = %id,
                current_status = %from,
                requested_status = %requested,
                "Transition rejected"
            );
            return Err(Error::InvalidTransition {
                entity: "assignment",
                id,
                from: from.to_string(),
                to: requested.to_string(),
            });
        }

        let now = time::now();
        assignment.status = requested;
        assignment.updated_at = now;
        if requested == AssignmentStatus::InProgress && assignment.started_at.is_none() {
            assignment.started_at = Some(now);
        }
        if requested == AssignmentStatus::Completed {
            assignment.completed_at = Some(now);
        }
        if let Some(notes) = notes {
            assignment.notes = Some(notes.to_string());
        }

        store::save(&mut tx, &assignment).await?;
        publish_status_changed(&mut tx, &assignment, from, actor, notes, now).await?;
        tx.commit().await?;

        info!(
            assignment_id = %id,
            old_status = %from,
            new_status = %requested,
            actor = %actor,
            "Assignment status changed"
        );
        Ok(assignment)
    }

    /// Edit descriptive fields of a non-terminal assignment
    ///
    /// An update that changes nothing is a no-op without an event.
    pub async fn update(&self, id: Uuid, input: &AssignmentUpdate, actor: &str) -> Result<Assignment> {
        let actor = validation::reference_id("actorId", actor)?;
        let title = input
            .title
            .as_deref()
            .map(|t| validation::title("title", t))
            .transpose()?;
        let duration = input
            .duration_minutes
            .map(validation::duration_minutes)
            .transpose()?;
        let description = input
            .description
            .as_deref()
            .map(|d| validation::optional_text("description", Some(d)))
            .transpose()?;
        let notes = input
            .notes
            .as_deref()
            .map(|n| validation::optional_text("notes", Some(n)))
            .transpose()?;

        retry_on_lock("assignment.update", self.max_lock_wait_ms, || {
            self.try_update(
                id,
                EditedFields {
                    title: title.as_deref(),
                    description: description.as_ref().map(|d| d.as_deref()),
                    planned_start_date: input.planned_start_date.map(time::to_millis),
                    duration_minutes: duration,
                    notes: notes.as_ref().map(|n| n.as_deref()),
                },
                &actor,
            )
        })
        .await
    }

    async fn try_update(&self, id: Uuid, edit: EditedFields<'_>, actor: &str) -> Result<Assignment> {
        let mut tx = self.db.begin().await?;

        store::lock(&mut tx, id).await?;
        let mut assignment = store::fetch(&mut *tx, id).await?.ok_or(Error::NotFound {
            entity: "assignment",
            id,
        })?;

        if assignment.status.is_terminal() {
            return Err(Error::AssignmentImmutable {
                id,
                status: assignment.status.to_string(),
            });
        }

        let mut changes = Changes::new();
        if let Some(title) = edit.title {
            changes.field("title", &assignment.title.as_str(), &title);
            assignment.title = title.to_string();
        }
        if let Some(description) = edit.description {
            changes.field("description", &assignment.description.as_deref(), &description);
            assignment.description = description.map(str::to_string);
        }
        if let Some(planned) = edit.planned_start_date {
            changes.field("plannedStartDate", &assignment.planned_start_date, &planned);
            assignment.planned_start_date = planned;
        }
        if let Some(duration) = edit.duration_minutes {
            changes.field("durationMinutes", &assignment.duration_minutes, &duration);
            assignment.duration_minutes = duration;
        }
        if let Some(notes) = edit.notes {
            changes.field("notes", &assignment.notes.as_deref(), &notes);
            assignment.notes = notes.map(str::to_string);
        }

        if changes.is_empty() {
            tx.rollback().await?;
            return Ok(assignment);
        }

        let now = time::now();
        assignment.updated_at = now;
        store::save(&mut tx, &assignment).await?;
        outbox::publish(
            &mut tx,
            NewEvent {
                name: EventName::AssignmentUpdated,
                aggregate_id: id,
                actor_id: actor,
                payload: json!({
                    "assignmentId": id,
                    "childId": assignment.child_id,
                    "routeId": assignment.route_id,
                    "changes": changes.as_value(),
                    "actorId": actor,
                }),
            },
            now,
        )
        .await?;
        tx.commit().await?;

        info!(assignment_id = %id, actor = %actor, "Assignment updated");
        Ok(assignment)
    }
}

/// Validated edit; the inner `None` of an optional text clears it
#[derive(Clone, Copy)]
struct EditedFields<'a> {
    title: Option<&'a str>,
    description: Option<Option<&'a str>>,
    planned_start_date: Option<DateTime<Utc>>,
    duration_minutes: Option<i64>,
    notes: Option<Option<&'a str>>,
}

async fn check_route_reference(
    conn: &mut SqliteConnection,
    assignment: &Assignment,
    route_id: Uuid,
) -> Result<()> {
    let route = route::store::fetch(&mut *conn, route_id)
        .await?
        .ok_or(Error::NotFound {
            entity: "route",
            id: route_id,
        })?;

    if !route.status.is_editable() {
        return Err(Error::Validation(format!(
            "route {} is {} and accepts no new assignments",
            route_id, route.status
        )));
    }
    if route.child_id != assignment.child_id {
        return Err(Error::Validation(format!(
            "route {} belongs to another child",
            route_id
        )));
    }
    if let Some(phase_id) = assignment.phase_id {
        if route::store::fetch_phase(&mut *conn, route_id, phase_id).await?.is_none() {
            return Err(Error::Validation(format!(
                "phase {} is not part of route {}",
                phase_id, route_id
            )));
        }
    }
    if let Some(goal_id) = assignment.goal_id {
        if route::store::fetch_goal(&mut *conn, route_id, goal_id).await?.is_none() {
            return Err(Error::Validation(format!(
                "goal {} is not part of route {}",
                goal_id, route_id
            )));
        }
    }
    Ok(())
}

/// `assignments.assignment.status_changed` payload
fn status_changed_payload(
    assignment: &Assignment,
    from: AssignmentStatus,
    actor: &str,
    notes: Option<&str>,
) -> Value {
    json!({
        "assignmentId": assignment.id,
        "childId": assignment.child_id,
        "routeId": assignment.route_id,
        "oldStatus": from,
        "newStatus": assignment.status,
        "actorId": actor,
        "notes": notes,
    })
}

pub(crate) async fn publish_status_changed(
    conn: &mut SqliteConnection,
    assignment: &Assignment,
    from: AssignmentStatus,
    actor: &str,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Uuid> {
    outbox::publish(
        conn,
        NewEvent {
            name: EventName::AssignmentStatusChanged,
            aggregate_id: assignment.id,
            actor_id: actor,
            payload: status_changed_payload(assignment, from, actor, notes),
        },
        now,
    )
    .await
}

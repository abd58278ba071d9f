//! Assignment lifecycle
//!
//! An assignment is one scheduled unit of therapeutic work. Its status moves
//! only along the closed transition table in [`AssignmentStatus::allowed_targets`];
//! terminal assignments are immutable.

mod manager;
pub mod store;

pub use manager::AssignmentManager;
pub(crate) use manager::publish_status_changed;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Assignment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Skipped,
    Overdue,
}

impl AssignmentStatus {
    pub const ALL: [AssignmentStatus; 6] = [
        AssignmentStatus::Scheduled,
        AssignmentStatus::InProgress,
        AssignmentStatus::Completed,
        AssignmentStatus::Cancelled,
        AssignmentStatus::Skipped,
        AssignmentStatus::Overdue,
    ];

    /// Transition table row for this status
    ///
    /// Closed whitelist: anything not listed is rejected, including
    /// scheduled -> completed (progress must be observed first).
    pub fn allowed_targets(&self) -> &'static [AssignmentStatus] {
        use AssignmentStatus::*;
        match self {
            Scheduled => &[InProgress, Cancelled, Skipped, Overdue],
            InProgress => &[Completed, Cancelled],
            Overdue => &[InProgress, Cancelled, Skipped],
            Completed | Cancelled | Skipped => &[],
        }
    }

    pub fn can_transition_to(&self, target: AssignmentStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Completed, cancelled and skipped assignments never change again
    pub fn is_terminal(&self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// Work still outstanding; blocks route completion
    pub fn is_open(&self) -> bool {
        matches!(self, AssignmentStatus::Scheduled | AssignmentStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Scheduled => "scheduled",
            AssignmentStatus::InProgress => "in_progress",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Cancelled => "cancelled",
            AssignmentStatus::Skipped => "skipped",
            AssignmentStatus::Overdue => "overdue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        AssignmentStatus::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: Uuid,
    pub status: AssignmentStatus,
    pub child_id: String,
    pub specialist_id: String,
    pub route_id: Option<Uuid>,
    pub phase_id: Option<Uuid>,
    pub goal_id: Option<Uuid>,
    pub exercise_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub planned_start_date: DateTime<Utc>,
    pub duration_minutes: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when scheduling a new assignment
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAssignment {
    pub child_id: String,
    pub specialist_id: String,
    #[serde(default)]
    pub route_id: Option<Uuid>,
    #[serde(default)]
    pub phase_id: Option<Uuid>,
    #[serde(default)]
    pub goal_id: Option<Uuid>,
    #[serde(default)]
    pub exercise_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub planned_start_date: DateTime<Utc>,
    pub duration_minutes: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Descriptive fields editable until the assignment is terminal
///
/// `None` leaves a field untouched; an empty string clears optional text.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub planned_start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Listing filter; unset fields match everything
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentFilter {
    #[serde(default)]
    pub child_id: Option<String>,
    #[serde(default)]
    pub route_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<AssignmentStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use AssignmentStatus::*;

    #[test]
    fn test_transition_table() {
        assert!(Scheduled.can_transition_to(InProgress));
        assert!(Scheduled.can_transition_to(Overdue));
        assert!(InProgress.can_transition_to(Completed));
        assert!(Overdue.can_transition_to(InProgress));
        assert!(Overdue.can_transition_to(Skipped));
    }

    #[test]
    fn test_shortcuts_rejected() {
        assert!(!Scheduled.can_transition_to(Completed));
        assert!(!Overdue.can_transition_to(Completed));
        assert!(!InProgress.can_transition_to(Scheduled));
        assert!(!InProgress.can_transition_to(Overdue));
        assert!(!InProgress.can_transition_to(Skipped));
    }

    #[test]
    fn test_self_transitions_rejected() {
        for status in AssignmentStatus::ALL {
            assert!(!status.can_transition_to(status), "{} -> {}", status, status);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        let terminal: Vec<_> = AssignmentStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal, vec![Completed, Cancelled, Skipped]);
    }

    #[test]
    fn test_open_statuses() {
        assert!(Scheduled.is_open());
        assert!(InProgress.is_open());
        assert!(!Overdue.is_open());
        assert!(!Completed.is_open());
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in AssignmentStatus::ALL {
            assert_eq!(AssignmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AssignmentStatus::parse("done"), None);
    }

    #[test]
    fn test_status_serde_matches_storage() {
        let json = serde_json::to_string(&InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}

//! Route lifecycle
//!
//! A route is a multi-phase care plan for one child. It owns ordered phases
//! and goals, moves through a closed status table, and records a revision for
//! every mutation.

mod manager;
pub mod store;

pub use manager::RouteManager;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Route status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Archived,
}

impl RouteStatus {
    pub const ALL: [RouteStatus; 5] = [
        RouteStatus::Draft,
        RouteStatus::Active,
        RouteStatus::Paused,
        RouteStatus::Completed,
        RouteStatus::Archived,
    ];

    /// Transition table row for this status
    pub fn allowed_targets(&self) -> &'static [RouteStatus] {
        use RouteStatus::*;
        match self {
            Draft => &[Active, Archived],
            Active => &[Paused, Completed, Archived],
            Paused => &[Active, Archived],
            Completed => &[Archived],
            Archived => &[],
        }
    }

    pub fn can_transition_to(&self, target: RouteStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Goals, phases and descriptive fields may still change
    pub fn is_editable(&self) -> bool {
        matches!(self, RouteStatus::Draft | RouteStatus::Active | RouteStatus::Paused)
    }

    /// Route is guiding (or about to resume guiding) work, so it must keep a goal
    pub fn requires_goals(&self) -> bool {
        matches!(self, RouteStatus::Active | RouteStatus::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStatus::Draft => "draft",
            RouteStatus::Active => "active",
            RouteStatus::Paused => "paused",
            RouteStatus::Completed => "completed",
            RouteStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        RouteStatus::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl std::fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Goal priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl GoalPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalPriority::Low => "low",
            GoalPriority::Medium => "medium",
            GoalPriority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(GoalPriority::Low),
            "medium" => Some(GoalPriority::Medium),
            "high" => Some(GoalPriority::High),
            _ => None,
        }
    }
}

/// Stored route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: Uuid,
    pub status: RouteStatus,
    pub child_id: String,
    pub lead_specialist_id: String,
    pub title: String,
    pub plan_horizon_weeks: i64,
    /// Mutation counter shown with the revision history
    pub version: i64,
    pub activated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: Uuid,
    pub route_id: Uuid,
    pub domain: String,
    pub title: String,
    pub priority: GoalPriority,
    pub target_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub id: Uuid,
    pub route_id: Uuid,
    pub title: String,
    pub order_index: i64,
    pub duration_weeks: i64,
}

/// Route with its owned goals and phases (phases in order)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDetail {
    #[serde(flatten)]
    pub route: Route,
    pub goals: Vec<Goal>,
    pub phases: Vec<Phase>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoute {
    pub child_id: String,
    pub lead_specialist_id: String,
    pub title: String,
    pub plan_horizon_weeks: i64,
}

/// Descriptive route fields; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub lead_specialist_id: Option<String>,
    #[serde(default)]
    pub plan_horizon_weeks: Option<i64>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGoal {
    pub domain: String,
    pub title: String,
    #[serde(default)]
    pub priority: GoalPriority,
    #[serde(default)]
    pub target_date: Option<NaiveDate>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalUpdate {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub priority: Option<GoalPriority>,
    #[serde(default)]
    pub target_date: Option<NaiveDate>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPhase {
    pub title: String,
    /// Appended after the last phase when omitted
    #[serde(default)]
    pub order_index: Option<i64>,
    pub duration_weeks: i64,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub order_index: Option<i64>,
    #[serde(default)]
    pub duration_weeks: Option<i64>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use RouteStatus::*;

    #[test]
    fn test_activation_sources() {
        assert!(Draft.can_transition_to(Active));
        assert!(Paused.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Archived.can_transition_to(Active));
    }

    #[test]
    fn test_completion_only_from_active() {
        for status in RouteStatus::ALL {
            assert_eq!(status.can_transition_to(Completed), status == Active);
        }
    }

    #[test]
    fn test_archive_from_everything_but_archived() {
        for status in RouteStatus::ALL {
            assert_eq!(status.can_transition_to(Archived), status != Archived);
        }
    }

    #[test]
    fn test_editable_statuses() {
        assert!(Draft.is_editable());
        assert!(Paused.is_editable());
        assert!(!Completed.is_editable());
        assert!(!Archived.is_editable());
    }

    #[test]
    fn test_goal_priority_default_and_parse() {
        assert_eq!(GoalPriority::default(), GoalPriority::Medium);
        assert_eq!(GoalPriority::parse("high"), Some(GoalPriority::High));
        assert_eq!(GoalPriority::parse("urgent"), None);
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in RouteStatus::ALL {
            assert_eq!(RouteStatus::parse(status.as_str()), Some(status));
        }
    }
}

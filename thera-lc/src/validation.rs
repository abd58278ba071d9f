//! Field validation shared by the assignment and route managers
//!
//! Only shape checks live here. Cross-entity invariants (goal counts, active
//! routes, open assignments) are checked by the managers inside their write
//! transaction.

use crate::error::{Error, Result};

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_TEXT_LEN: usize = 10_000;
pub const MAX_DURATION_MINUTES: i64 = 8 * 60;
pub const MAX_PLAN_HORIZON_WEEKS: i64 = 104;
pub const MAX_PHASE_DURATION_WEEKS: i64 = 104;
pub const MAX_ORDER_INDEX: i64 = 10_000;

/// Non-empty, trimmed, bounded title
pub fn title(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", field)));
    }
    if trimmed.chars().count() > MAX_TITLE_LEN {
        return Err(Error::Validation(format!(
            "{} must be at most {} characters",
            field, MAX_TITLE_LEN
        )));
    }
    Ok(trimmed.to_string())
}

/// Optional free text; blank becomes `None`
pub fn optional_text(field: &str, value: Option<&str>) -> Result<Option<String>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) if text.chars().count() > MAX_TEXT_LEN => Err(Error::Validation(format!(
            "{} must be at most {} characters",
            field, MAX_TEXT_LEN
        ))),
        Some(text) => Ok(Some(text.to_string())),
    }
}

/// External identity reference (child, specialist, actor, exercise)
pub fn reference_id(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!("{} is required", field)));
    }
    if trimmed.len() > 128 {
        return Err(Error::Validation(format!("{} is too long", field)));
    }
    Ok(trimmed.to_string())
}

pub fn duration_minutes(value: i64) -> Result<i64> {
    in_range("durationMinutes", value, 1, MAX_DURATION_MINUTES)
}

pub fn plan_horizon_weeks(value: i64) -> Result<i64> {
    in_range("planHorizonWeeks", value, 1, MAX_PLAN_HORIZON_WEEKS)
}

pub fn phase_duration_weeks(value: i64) -> Result<i64> {
    in_range("durationWeeks", value, 1, MAX_PHASE_DURATION_WEEKS)
}

pub fn order_index(value: i64) -> Result<i64> {
    in_range("orderIndex", value, 0, MAX_ORDER_INDEX)
}

fn in_range(field: &str, value: i64, min: i64, max: i64) -> Result<i64> {
    if value < min || value > max {
        return Err(Error::Validation(format!(
            "{} must be between {} and {}, got {}",
            field, min, max, value
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_trims_and_rejects_blank() {
        assert_eq!(title("title", "  Speech drill ").unwrap(), "Speech drill");
        assert!(matches!(title("title", "   "), Err(Error::Validation(_))));
    }

    #[test]
    fn test_title_length_limit() {
        let long = "a".repeat(MAX_TITLE_LEN + 1);
        assert!(title("title", &long).is_err());
        assert!(title("title", &long[..MAX_TITLE_LEN]).is_ok());
    }

    #[test]
    fn test_optional_text_blank_is_none() {
        assert_eq!(optional_text("notes", Some("  ")).unwrap(), None);
        assert_eq!(optional_text("notes", None).unwrap(), None);
        assert_eq!(
            optional_text("notes", Some(" went well ")).unwrap(),
            Some("went well".to_string())
        );
    }

    #[test]
    fn test_numeric_ranges() {
        assert!(duration_minutes(0).is_err());
        assert!(duration_minutes(45).is_ok());
        assert!(duration_minutes(MAX_DURATION_MINUTES + 1).is_err());
        assert!(plan_horizon_weeks(12).is_ok());
        assert!(plan_horizon_weeks(-1).is_err());
        assert!(phase_duration_weeks(0).is_err());
        assert!(order_index(-1).is_err());
        assert_eq!(order_index(0).unwrap(), 0);
        assert!(order_index(MAX_ORDER_INDEX).is_ok());
        assert!(order_index(i64::MAX).is_err());
    }

    #[test]
    fn test_reference_id_required() {
        assert!(reference_id("childId", "").is_err());
        assert_eq!(reference_id("childId", " c-1 ").unwrap(), "c-1");
    }
}

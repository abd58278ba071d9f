//! Timestamp utilities
//!
//! Timestamps are stored as RFC 3339 text with millisecond precision and a `Z`
//! suffix, so lexical order in SQLite matches chronological order.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

/// Get current UTC timestamp at storage precision
pub fn now() -> DateTime<Utc> {
    to_millis(Utc::now())
}

/// Drop sub-millisecond precision so a value survives a storage round trip unchanged
pub fn to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

/// Format a timestamp for storage
pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp
pub fn from_db(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Bad timestamp '{}': {}", value, e)))
}

/// Parse an optional stored timestamp
pub fn from_db_opt(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(from_db).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
    }

    #[test]
    fn test_db_format_has_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        assert_eq!(to_db(whole), "2026-03-01T09:00:00.000Z");
    }

    #[test]
    fn test_db_format_sorts_chronologically() {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let later = base + Duration::milliseconds(5);
        assert!(to_db(base) < to_db(later));
    }

    #[test]
    fn test_parse_roundtrip_keeps_millis() {
        let ts = Utc.timestamp_millis_opt(1_772_355_600_123).unwrap();
        assert_eq!(from_db(&to_db(ts)).unwrap(), ts);
    }

    #[test]
    fn test_now_survives_storage_roundtrip() {
        let ts = now();
        assert_eq!(from_db(&to_db(ts)).unwrap(), ts);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(from_db("yesterday").is_err());
        assert!(from_db_opt(None).unwrap().is_none());
    }
}

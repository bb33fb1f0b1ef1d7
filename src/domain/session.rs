//! Stay sessions reconstructed from entry/exit crossings

use crate::domain::types::{millis_to_hours, EntityKey};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// One reconstructed stay: an entry paired with the earliest exit at or after it.
///
/// Open sessions (no exit found) only exist when the caller asked to retain them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub key: EntityKey,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    /// Whole seconds between entry and exit (truncated; see [`Session::duration`])
    pub duration_secs: Option<i64>,
}

impl Session {
    /// Closed session. `exit_time` must not precede `entry_time`.
    pub fn closed(key: EntityKey, entry_time: DateTime<Utc>, exit_time: DateTime<Utc>) -> Self {
        debug_assert!(exit_time >= entry_time);
        let duration_secs = (exit_time - entry_time).num_seconds();
        Self { key, entry_time, exit_time: Some(exit_time), duration_secs: Some(duration_secs) }
    }

    pub fn open(key: EntityKey, entry_time: DateTime<Utc>) -> Self {
        Self { key, entry_time, exit_time: None, duration_secs: None }
    }

    /// Exact time between entry and exit, sub-second parts included
    #[inline]
    pub fn duration(&self) -> Option<TimeDelta> {
        self.exit_time.map(|exit| exit - self.entry_time)
    }

    /// Duration in fractional hours, millisecond precision
    pub fn duration_hours(&self) -> Option<f64> {
        self.duration().map(|d| millis_to_hours(d.num_milliseconds()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key() -> EntityKey {
        EntityKey::parse("D", "X1").unwrap()
    }

    #[test]
    fn test_closed_session_duration() {
        let entry = Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap();
        let exit = Utc.with_ymd_and_hms(2025, 1, 1, 16, 30, 0).unwrap();
        let session = Session::closed(key(), entry, exit);

        assert_eq!(session.duration_secs, Some(37_800));
        assert_eq!(session.duration_hours(), Some(10.5));
    }

    #[test]
    fn test_open_session() {
        let entry = Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap();
        let session = Session::open(key(), entry);

        assert_eq!(session.duration(), None);
        assert_eq!(session.duration_hours(), None);
    }

    #[test]
    fn test_sub_second_duration_kept() {
        let entry = Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap() + TimeDelta::milliseconds(900);
        let exit = entry + TimeDelta::milliseconds(200);
        let session = Session::closed(key(), entry, exit);

        assert_eq!(session.duration_secs, Some(0));
        assert_eq!(session.duration(), Some(TimeDelta::milliseconds(200)));
        assert_eq!(session.duration_hours(), Some(200.0 / 3_600_000.0));
    }

    #[test]
    fn test_session_serializes_key_fields() {
        let entry = Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap();
        let session = Session::closed(key(), entry, entry);
        let json = serde_json::to_value(&session).unwrap();

        assert_eq!(json["key"]["region"], "D");
        assert_eq!(json["key"]["plate"], "X1");
        assert_eq!(json["duration_secs"], 0);
    }
}

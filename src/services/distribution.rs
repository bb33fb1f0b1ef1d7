//! Distribution queries: stay durations and raw crossing timestamps
//!
//! Both report p50/p90/p99 in hours through the KLL sketch.

use crate::domain::types::millis_to_hours;
use crate::domain::{Direction, ScanRequest, Session, TimeRange};
use crate::error::Result;
use crate::io::source::{for_each_event, EventSource, ScanStats};
use crate::services::quantile::{QuantileSketch, QuantileSummary};
use crate::services::sessionizer::{reconstruct, SessionQuery, SessionStats};
use serde::Serialize;
use tracing::info;

/// Quantiles of closed session durations in hours. `None` means no data.
pub fn duration_distribution(sessions: &[Session], k: usize) -> Result<Option<QuantileSummary>> {
    let hours: Vec<f64> = sessions.iter().filter_map(|s| s.duration_hours()).collect();
    let sketch = QuantileSketch::from_values(&hours, k)?;
    Ok(sketch.summary())
}

/// Result of a distribution query
#[derive(Debug, Clone, Serialize)]
pub struct DistributionOutcome {
    /// `None` when nothing matched
    pub summary: Option<QuantileSummary>,
    pub scan: ScanStats,
}

/// Duration distribution with the session counters that produced it
#[derive(Debug, Clone, Serialize)]
pub struct DurationOutcome {
    pub summary: Option<QuantileSummary>,
    pub sessions: SessionStats,
    pub scan: ScanStats,
}

/// Reconstruct sessions from a source and summarize their durations.
///
/// Uses the query's entry range and key filter; the limit does not apply.
pub fn query_durations(
    source: &dyn EventSource,
    query: &SessionQuery,
    k: usize,
) -> Result<DurationOutcome> {
    // Validate k before scanning
    QuantileSketch::new(k)?;

    let request = query.scan_request();
    let mut events = Vec::new();
    let scan = for_each_event(source, &request, |event| {
        if request.wants_timestamp(event.timestamp)
            && query.key.as_ref().is_none_or(|key| *key == event.key)
        {
            events.push(event);
        }
    })?;

    let report = reconstruct(events, query.unmatched);
    let sessions: Vec<Session> = match query.entry_range {
        Some(range) => report.sessions.into_iter().filter(|s| range.contains(s.entry_time)).collect(),
        None => report.sessions,
    };
    let summary = duration_distribution(&sessions, k)?;

    info!(
        source = %source.name(),
        sessions = %sessions.len(),
        p50_hours = ?summary.map(|s| s.p50),
        p99_hours = ?summary.map(|s| s.p99),
        "duration_distribution_complete"
    );
    Ok(DurationOutcome { summary, sessions: report.stats, scan })
}

/// Quantiles of raw event timestamps (epoch hours).
///
/// Streams straight into the sketch; events are never collected.
pub fn timestamp_distribution(
    source: &dyn EventSource,
    range: Option<TimeRange>,
    direction: Option<Direction>,
    k: usize,
) -> Result<DistributionOutcome> {
    let mut sketch = QuantileSketch::new(k)?;
    let request = match range {
        Some(range) => ScanRequest::for_range(range),
        None => ScanRequest::all(),
    }
    .with_direction(direction);

    let scan = for_each_event(source, &request, |event| {
        if request.wants_timestamp(event.timestamp) && request.wants_direction(event.direction) {
            sketch.add(millis_to_hours(event.timestamp.timestamp_millis()));
        }
    })?;
    let summary = sketch.summary();

    info!(
        source = %source.name(),
        values = %sketch.count(),
        retained = %sketch.retained(),
        exact = %sketch.is_exact(),
        "timestamp_distribution_complete"
    );
    Ok(DistributionOutcome { summary, scan })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityKey, Event, Limit};
    use crate::io::memory::MemorySource;
    use crate::services::quantile::DEFAULT_K;
    use chrono::{TimeZone, Utc};

    fn key(plate: &str) -> EntityKey {
        EntityKey::parse("S", plate).unwrap()
    }

    #[test]
    fn test_no_sessions_is_no_data() {
        assert_eq!(duration_distribution(&[], DEFAULT_K).unwrap(), None);

        let open = Session::open(key("A"), Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(duration_distribution(&[open], DEFAULT_K).unwrap(), None);
    }

    #[test]
    fn test_durations_in_hours() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let sessions: Vec<Session> = (1..=10)
            .map(|h| Session::closed(key("A"), start, start + chrono::Duration::hours(h)))
            .collect();
        let summary = duration_distribution(&sessions, DEFAULT_K).unwrap().unwrap();

        assert_eq!(summary.count, 10);
        assert_eq!(summary.p50, 5.0);
        assert_eq!(summary.p90, 9.0);
        assert_eq!(summary.p99, 10.0);
    }

    #[test]
    fn test_invalid_k_is_rejected() {
        let source = MemorySource::new("mem", Vec::new());
        let query = SessionQuery::new(Limit::new(1).unwrap());
        assert!(query_durations(&source, &query, 2).is_err());
        assert!(timestamp_distribution(&source, None, None, 2).is_err());
    }

    #[test]
    fn test_query_durations_from_source() {
        let t = |h: u32| Utc.with_ymd_and_hms(2025, 1, 2, h, 0, 0).unwrap();
        let source = MemorySource::new(
            "mem",
            vec![
                Event::entry(t(0), key("A")),
                Event::exit(t(2), key("A")),
                Event::entry(t(1), key("B")),
                Event::exit(t(7), key("B")),
            ],
        );
        let outcome =
            query_durations(&source, &SessionQuery::new(Limit::new(1).unwrap()), DEFAULT_K).unwrap();
        let summary = outcome.summary.unwrap();

        assert_eq!(summary.count, 2);
        assert_eq!(summary.p50, 2.0);
        assert_eq!(summary.p99, 6.0);
        assert_eq!(outcome.sessions.closed, 2);
    }

    #[test]
    fn test_timestamp_distribution_epoch_hours() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let events: Vec<Event> =
            (0..4).map(|h| Event::entry(base + chrono::Duration::hours(h), key("A"))).collect();
        let source = MemorySource::new("mem", events);

        let outcome = timestamp_distribution(&source, None, None, DEFAULT_K).unwrap();
        let summary = outcome.summary.unwrap();
        let base_hours = base.timestamp() as f64 / 3600.0;

        assert_eq!(summary.p50, base_hours + 1.0);
        assert_eq!(summary.p99, base_hours + 3.0);
        assert_eq!(outcome.scan.scanned, 4);
    }

    #[test]
    fn test_timestamp_distribution_empty_range() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let source = MemorySource::new("mem", vec![Event::entry(base, key("A"))]);
        let range = TimeRange::new(base + chrono::Duration::days(1), base + chrono::Duration::days(2)).unwrap();

        let outcome = timestamp_distribution(&source, Some(range), None, DEFAULT_K).unwrap();
        assert!(outcome.summary.is_none());
    }
}

//! Event source contract
//!
//! Sources hand the core a lazily produced stream of normalized events. A stream
//! item is either an event, a malformed record (skipped and counted) or a source
//! failure (aborts the query). Scan hints are optional for a source to honour.

use crate::domain::{Event, ScanRequest};
use crate::error::{AnalyticsError, RecordError, Result, SourceError};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Stream of events produced by one scan
pub type EventStream<'a> = Box<dyn Iterator<Item = std::result::Result<Event, RecordError>> + Send + 'a>;

/// One open scan: its event stream plus what planning it eliminated.
///
/// Everything a scan reports travels with it, so concurrent scans of one source
/// never see each other's counters.
pub struct Scan<'a> {
    events: EventStream<'a>,
    /// Partitions skipped before any file was opened
    pub pruned: u64,
}

impl<'a> Scan<'a> {
    pub fn new(events: EventStream<'a>) -> Self {
        Self { events, pruned: 0 }
    }

    pub fn with_pruned(mut self, pruned: u64) -> Self {
        self.pruned = pruned;
        self
    }
}

impl Iterator for Scan<'_> {
    type Item = std::result::Result<Event, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.events.next()
    }
}

/// Backend-agnostic supplier of crossing events.
///
/// Each call to `scan` is a fresh read; the core never assumes a long-lived
/// connection and never retries.
pub trait EventSource: Send + Sync {
    /// Label used in logs and benchmark reports
    fn name(&self) -> &str;

    /// Start a scan. Hints in `request` may be ignored.
    fn scan(&self, request: &ScanRequest) -> std::result::Result<Scan<'_>, SourceError>;
}

/// Counters from draining one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Well-formed events received from the source
    pub scanned: u64,
    /// Malformed records rejected
    pub skipped: u64,
    /// Partitions the source eliminated for this scan
    pub pruned: u64,
}

/// Drain a scan, handing each well-formed event to `visit`.
///
/// Malformed records are counted and skipped. A source failure aborts the scan
/// and is returned as `SourceUnavailable`.
pub fn for_each_event<F>(
    source: &dyn EventSource,
    request: &ScanRequest,
    mut visit: F,
) -> Result<ScanStats>
where
    F: FnMut(Event),
{
    let scan = source.scan(request).map_err(|e| {
        warn!(source = %source.name(), error = %e, "scan_open_failed");
        AnalyticsError::unavailable(source.name(), e)
    })?;

    let mut stats = ScanStats { pruned: scan.pruned, ..ScanStats::default() };
    for item in scan {
        match item {
            Ok(event) => {
                stats.scanned += 1;
                visit(event);
            }
            Err(RecordError::Malformed(reason)) => {
                stats.skipped += 1;
                debug!(source = %source.name(), reason = %reason, "record_skipped");
            }
            Err(RecordError::Source(e)) => {
                warn!(source = %source.name(), error = %e, "scan_read_failed");
                return Err(AnalyticsError::unavailable(source.name(), e));
            }
        }
    }

    if stats.skipped > 0 {
        warn!(source = %source.name(), skipped = %stats.skipped, "malformed_records_skipped");
    }
    info!(
        source = %source.name(),
        scanned = %stats.scanned,
        skipped = %stats.skipped,
        pruned_partitions = %stats.pruned,
        "scan_complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, EntityKey};
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    /// Source replaying a fixed list of stream items
    struct Scripted {
        fail_open: bool,
        fail_mid_stream: bool,
    }

    impl EventSource for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn scan(&self, _request: &ScanRequest) -> std::result::Result<Scan<'_>, SourceError> {
            if self.fail_open {
                return Err(SourceError::NotFound(PathBuf::from("/nowhere")));
            }
            let key = EntityKey::parse("D", "X1").unwrap();
            let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
            let mut items = vec![
                Ok(Event::new(ts, key.clone(), Direction::Entry)),
                Err(RecordError::malformed("missing ts")),
                Ok(Event::new(ts, key, Direction::Exit)),
            ];
            if self.fail_mid_stream {
                items.push(Err(RecordError::Source(SourceError::io(
                    "/broken",
                    std::io::Error::other("disk gone"),
                ))));
            }
            Ok(Scan::new(Box::new(items.into_iter())).with_pruned(7))
        }
    }

    #[test]
    fn test_collect_counts_skipped_records() {
        let source = Scripted { fail_open: false, fail_mid_stream: false };
        let mut events = Vec::new();
        let stats = for_each_event(&source, &ScanRequest::all(), |e| events.push(e)).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(stats, ScanStats { scanned: 2, skipped: 1, pruned: 7 });
    }

    #[test]
    fn test_open_failure_is_source_unavailable() {
        let source = Scripted { fail_open: true, fail_mid_stream: false };
        let err = for_each_event(&source, &ScanRequest::all(), |_| {}).unwrap_err();

        assert!(matches!(err, AnalyticsError::SourceUnavailable { ref source_name, .. } if source_name == "scripted"));
    }

    #[test]
    fn test_read_failure_discards_partial_result() {
        let source = Scripted { fail_open: false, fail_mid_stream: true };
        let mut events = Vec::new();
        let result = for_each_event(&source, &ScanRequest::all(), |e| events.push(e));

        assert!(matches!(result, Err(AnalyticsError::SourceUnavailable { .. })));
    }
}

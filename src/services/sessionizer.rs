//! Session reconstruction from entry/exit crossings
//!
//! Events are partitioned by entity key and each partition is sorted by
//! timestamp (stable, so equal timestamps keep arrival order). Every entry is
//! paired with the earliest exit whose timestamp is at or after the entry's,
//! searching the whole partition rather than only unmatched exits:
//!
//! ```text
//! t=0 ENTRY, t=3 ENTRY, t=10 EXIT   =>   (0 -> 10), (3 -> 10)
//! ```
//!
//! An exit can therefore close several stays when the exits between them were
//! never recorded. This is a known quirk of incomplete sensor data, kept so the
//! results match the windowed-minimum queries run against the backing stores. It
//! does not mean one session per physical visit.
//!
//! Per partition the pairing is a suffix-minimum scan: walk backwards keeping the
//! latest-seen (i.e. smallest following) exit timestamp. Cost is the sort plus
//! one linear pass. Partitions are independent and run in parallel.

use crate::domain::{Direction, EntityKey, Event, Limit, ScanRequest, Session, TimeRange};
use crate::error::Result;
use crate::io::source::{for_each_event, EventSource, ScanStats};
use crate::services::ranking::top_k;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info};

/// What to do with entries that have no exit at or after them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedEntries {
    /// Drop them (matches the backing-store queries)
    #[default]
    Drop,
    /// Keep them as open sessions without exit or duration
    RetainOpen,
}

/// Counters describing one reconstruction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub partitions: u64,
    pub entries: u64,
    pub exits: u64,
    /// Sessions with an exit
    pub closed: u64,
    /// Unmatched entries kept as open sessions
    pub open: u64,
    /// Unmatched entries dropped
    pub dropped: u64,
    /// Exits that closed more than one session
    pub shared_exits: u64,
}

impl SessionStats {
    fn merge(&mut self, other: &SessionStats) {
        self.partitions += other.partitions;
        self.entries += other.entries;
        self.exits += other.exits;
        self.closed += other.closed;
        self.open += other.open;
        self.dropped += other.dropped;
        self.shared_exits += other.shared_exits;
    }
}

/// Sessions plus counters, ordered by entity key then entry time
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionReport {
    pub sessions: Vec<Session>,
    pub stats: SessionStats,
}

type Crossing = (DateTime<Utc>, Direction);

/// Reconstruct sessions from an unordered set of events.
///
/// Pure: the result depends only on the input events and `unmatched`.
pub fn reconstruct<I>(events: I, unmatched: UnmatchedEntries) -> SessionReport
where
    I: IntoIterator<Item = Event>,
{
    let mut partitions: FxHashMap<EntityKey, Vec<Crossing>> = FxHashMap::default();
    for event in events {
        partitions.entry(event.key).or_default().push((event.timestamp, event.direction));
    }

    let mut partitions: Vec<(EntityKey, Vec<Crossing>)> = partitions.into_iter().collect();
    partitions.sort_unstable_by(|a, b| a.0.cmp(&b.0));

    let per_partition: Vec<(Vec<Session>, SessionStats)> = partitions
        .into_par_iter()
        .map(|(key, crossings)| sessionize_partition(key, crossings, unmatched))
        .collect();

    let mut report = SessionReport::default();
    for (sessions, stats) in per_partition {
        report.sessions.extend(sessions);
        report.stats.merge(&stats);
    }

    debug!(
        partitions = %report.stats.partitions,
        entries = %report.stats.entries,
        exits = %report.stats.exits,
        closed = %report.stats.closed,
        open = %report.stats.open,
        dropped = %report.stats.dropped,
        shared_exits = %report.stats.shared_exits,
        "sessions_reconstructed"
    );
    report
}

/// Pair entries with exits inside one entity's partition
fn sessionize_partition(
    key: EntityKey,
    mut crossings: Vec<Crossing>,
    unmatched: UnmatchedEntries,
) -> (Vec<Session>, SessionStats) {
    // Stable: equal timestamps keep arrival order
    crossings.sort_by_key(|c| c.0);

    let mut stats = SessionStats { partitions: 1, ..Default::default() };
    let mut matched_exit: Vec<Option<DateTime<Utc>>> = vec![None; crossings.len()];

    // Suffix scan over groups of equal timestamps. An exit sharing the entry's
    // timestamp qualifies whichever arrived first.
    let mut next_exit: Option<DateTime<Utc>> = None;
    let mut end = crossings.len();
    while end > 0 {
        let ts = crossings[end - 1].0;
        let mut start = end - 1;
        while start > 0 && crossings[start - 1].0 == ts {
            start -= 1;
        }
        if crossings[start..end].iter().any(|c| c.1 == Direction::Exit) {
            next_exit = Some(ts);
        }
        for (slot, crossing) in matched_exit[start..end].iter_mut().zip(&crossings[start..end]) {
            if crossing.1 == Direction::Entry {
                *slot = next_exit;
            }
        }
        end = start;
    }

    let mut sessions = Vec::new();
    let mut last_exit: Option<DateTime<Utc>> = None;
    let mut last_exit_uses = 0u32;
    for (crossing, exit) in crossings.iter().zip(&matched_exit) {
        match crossing.1 {
            Direction::Exit => stats.exits += 1,
            Direction::Entry => {
                stats.entries += 1;
                match exit {
                    Some(exit) => {
                        stats.closed += 1;
                        // Matched exits are non-decreasing, so reuse shows up as a run
                        if last_exit == Some(*exit) {
                            last_exit_uses += 1;
                            if last_exit_uses == 2 {
                                stats.shared_exits += 1;
                            }
                        } else {
                            last_exit = Some(*exit);
                            last_exit_uses = 1;
                        }
                        sessions.push(Session::closed(key.clone(), crossing.0, *exit));
                    }
                    None => match unmatched {
                        UnmatchedEntries::Drop => stats.dropped += 1,
                        UnmatchedEntries::RetainOpen => {
                            stats.open += 1;
                            sessions.push(Session::open(key.clone(), crossing.0));
                        }
                    },
                }
            }
        }
    }

    (sessions, stats)
}

/// Parameters for a ranked session query
#[derive(Debug, Clone)]
pub struct SessionQuery {
    /// Keep sessions whose entry falls in this range
    pub entry_range: Option<TimeRange>,
    /// Restrict to one vehicle (lookup)
    pub key: Option<EntityKey>,
    pub unmatched: UnmatchedEntries,
    pub limit: Limit,
}

impl SessionQuery {
    pub fn new(limit: Limit) -> Self {
        Self { entry_range: None, key: None, unmatched: UnmatchedEntries::Drop, limit }
    }

    pub fn with_entry_range(mut self, range: TimeRange) -> Self {
        self.entry_range = Some(range);
        self
    }

    pub fn with_key(mut self, key: EntityKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_unmatched(mut self, unmatched: UnmatchedEntries) -> Self {
        self.unmatched = unmatched;
        self
    }

    /// Pushdown hint: only events at or after the range start can pair with an
    /// entry inside the range, so the end stays open.
    pub fn scan_request(&self) -> ScanRequest {
        match self.entry_range {
            Some(range) => ScanRequest::for_range(TimeRange {
                start: range.start,
                end: DateTime::<Utc>::MAX_UTC,
            }),
            None => ScanRequest::all(),
        }
    }
}

/// Ranked result of a session query
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    /// Longest stays first
    pub sessions: Vec<Session>,
    pub stats: SessionStats,
    pub scan: ScanStats,
}

/// Scan a source, reconstruct sessions and return the longest ones
pub fn query_sessions(source: &dyn EventSource, query: &SessionQuery) -> Result<SessionOutcome> {
    let request = query.scan_request();
    let mut events = Vec::new();
    let scan = for_each_event(source, &request, |event| {
        // Re-apply hints: sources may ignore them
        if !request.wants_timestamp(event.timestamp) {
            return;
        }
        if query.key.as_ref().is_some_and(|k| *k != event.key) {
            return;
        }
        events.push(event);
    })?;

    let report = reconstruct(events, query.unmatched);
    let candidates: Vec<Session> = match query.entry_range {
        Some(range) => report.sessions.into_iter().filter(|s| range.contains(s.entry_time)).collect(),
        None => report.sessions,
    };
    let sessions = top_k(candidates, query.limit);

    info!(
        source = %source.name(),
        key = ?query.key.as_ref().map(|k| k.to_string()),
        returned = %sessions.len(),
        closed = %report.stats.closed,
        shared_exits = %report.stats.shared_exits,
        skipped = %scan.skipped,
        "session_query_complete"
    );
    Ok(SessionOutcome { sessions, stats: report.stats, scan })
}

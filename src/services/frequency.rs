//! Windowed frequency aggregation
//!
//! Counts crossings per entity inside a half-open calendar window and keeps the
//! entities seen strictly more often than the threshold. Events from both
//! directions count unless a direction filter is given.

use crate::domain::{Direction, EntityKey, Event, Limit, ScanRequest, WindowSpec};
use crate::error::Result;
use crate::io::source::{for_each_event, EventSource, ScanStats};
use crate::services::ranking::{top_k, Ranked};
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::info;

/// Occurrence count for one entity inside a window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrequencyRecord {
    pub key: EntityKey,
    pub count: u64,
}

impl Ranked for FrequencyRecord {
    type Metric = u64;
    type Tiebreak = ();

    fn metric(&self) -> u64 {
        self.count
    }

    fn key(&self) -> &EntityKey {
        &self.key
    }

    fn tiebreak(&self) {}
}

/// Incremental counter over a fixed window
pub struct FrequencyCounter {
    window: WindowSpec,
    direction: Option<Direction>,
    counts: FxHashMap<EntityKey, u64>,
    outside: u64,
}

impl FrequencyCounter {
    pub fn new(window: WindowSpec, direction: Option<Direction>) -> Self {
        Self { window, direction, counts: FxHashMap::default(), outside: 0 }
    }

    /// Count one event if it falls inside the window (and matches the filter)
    pub fn observe(&mut self, event: Event) {
        if !self.window.contains(event.timestamp)
            || self.direction.is_some_and(|d| d != event.direction)
        {
            self.outside += 1;
            return;
        }
        *self.counts.entry(event.key).or_insert(0) += 1;
    }

    /// Events rejected by the window or direction filter
    pub fn outside(&self) -> u64 {
        self.outside
    }

    /// Entities counted so far, qualifying or not
    pub fn distinct(&self) -> usize {
        self.counts.len()
    }

    /// Records with `count > threshold`, unordered
    pub fn finish(self) -> Vec<FrequencyRecord> {
        let window = self.window;
        self.counts
            .into_iter()
            .filter(|(_, count)| window.qualifies(*count))
            .map(|(key, count)| FrequencyRecord { key, count })
            .collect()
    }
}

/// Aggregate already-loaded events. Unordered; rank with [`top_k`].
pub fn aggregate<I>(events: I, window: &WindowSpec, direction: Option<Direction>) -> Vec<FrequencyRecord>
where
    I: IntoIterator<Item = Event>,
{
    let mut counter = FrequencyCounter::new(*window, direction);
    for event in events {
        counter.observe(event);
    }
    counter.finish()
}

/// Ranked result of a frequency query
#[derive(Debug, Clone, Serialize)]
pub struct FrequencyOutcome {
    /// Highest count first, ties by entity key
    pub records: Vec<FrequencyRecord>,
    /// Entities above the threshold before the limit was applied
    pub qualifying: usize,
    pub scan: ScanStats,
}

/// Scan a source and return the most frequent entities in the window
pub fn query_frequent(
    source: &dyn EventSource,
    window: &WindowSpec,
    direction: Option<Direction>,
    limit: Limit,
) -> Result<FrequencyOutcome> {
    let request = ScanRequest::for_range(window.time_range()).with_direction(direction);
    let mut counter = FrequencyCounter::new(*window, direction);
    let scan = for_each_event(source, &request, |event| counter.observe(event))?;

    let distinct = counter.distinct();
    let outside = counter.outside();
    let qualifying = counter.finish();
    let count = qualifying.len();
    let records = top_k(qualifying, limit);

    info!(
        source = %source.name(),
        window_start = %window.start(),
        window_days = %window.length_days(),
        threshold = %window.threshold(),
        distinct = %distinct,
        outside_window = %outside,
        qualifying = %count,
        returned = %records.len(),
        "frequency_query_complete"
    );
    Ok(FrequencyOutcome { records, qualifying: count, scan })
}

//! Query parameters: time windows, result limits and pushdown hints
//!
//! All values are validated on construction and passed explicitly into each
//! operation. Nothing here is process-wide state.

use crate::domain::types::Direction;
use crate::error::{AnalyticsError, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

/// Half-open instant range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(AnalyticsError::invalid(format!(
                "time range end {} precedes start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    #[inline]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Smallest set of UTC calendar days covering the range
    pub fn date_buckets(&self) -> Option<DateBucketRange> {
        if self.is_empty() {
            return None;
        }
        let first = self.start.date_naive();
        // end is exclusive: the last covered instant is end - 1ns
        let last = (self.end - Duration::nanoseconds(1)).date_naive();
        Some(DateBucketRange { first, last })
    }
}

/// Inclusive range of `date=` partition buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateBucketRange {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl DateBucketRange {
    #[inline]
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.first <= day && day <= self.last
    }
}

/// Calendar window with a strict occurrence threshold.
///
/// Covers `[start 00:00 UTC, start + length_days)`; records qualify when
/// `count > threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowSpec {
    start: NaiveDate,
    length_days: u32,
    threshold: u64,
}

impl WindowSpec {
    pub fn new(start: NaiveDate, length_days: i64, threshold: i64) -> Result<Self> {
        if length_days < 0 {
            return Err(AnalyticsError::invalid(format!(
                "window length must not be negative (got {})",
                length_days
            )));
        }
        if threshold < 0 {
            return Err(AnalyticsError::invalid(format!(
                "threshold must not be negative (got {})",
                threshold
            )));
        }
        let length_days = u32::try_from(length_days).map_err(|_| {
            AnalyticsError::invalid(format!("window length {} is too large", length_days))
        })?;
        // Reject windows whose end is not representable
        start.checked_add_days(chrono::Days::new(u64::from(length_days))).ok_or_else(|| {
            AnalyticsError::invalid(format!(
                "window {} + {} days overflows the calendar",
                start, length_days
            ))
        })?;
        Ok(Self { start, length_days, threshold: threshold as u64 })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn length_days(&self) -> u32 {
        self.length_days
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// First day after the window
    pub fn end_date(&self) -> NaiveDate {
        // Checked in new()
        self.start + chrono::Days::new(u64::from(self.length_days))
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            start: self.start.and_time(chrono::NaiveTime::MIN).and_utc(),
            end: self.end_date().and_time(chrono::NaiveTime::MIN).and_utc(),
        }
    }

    #[inline]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.time_range().contains(ts)
    }

    /// Strict "more than threshold" test
    #[inline]
    pub fn qualifies(&self, count: u64) -> bool {
        count > self.threshold
    }
}

/// Maximum number of rows returned by a ranked query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Limit(usize);

impl Limit {
    pub fn new(limit: i64) -> Result<Self> {
        if limit < 0 {
            return Err(AnalyticsError::invalid(format!(
                "limit must not be negative (got {})",
                limit
            )));
        }
        usize::try_from(limit)
            .map(Self)
            .map_err(|_| AnalyticsError::invalid(format!("limit {} is too large", limit)))
    }

    #[inline]
    pub fn get(&self) -> usize {
        self.0
    }
}

/// Predicates a query may push down to an event source.
///
/// Purely a performance hint: the core re-applies every predicate to the events
/// it receives, so a source may ignore any of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanRequest {
    pub time_range: Option<TimeRange>,
    pub date_buckets: Option<DateBucketRange>,
    pub direction: Option<Direction>,
}

impl ScanRequest {
    /// Full scan, no hints
    pub fn all() -> Self {
        Self::default()
    }

    /// Hints derived from a time range (plus its date buckets)
    pub fn for_range(range: TimeRange) -> Self {
        Self { time_range: Some(range), date_buckets: range.date_buckets(), direction: None }
    }

    pub fn with_direction(mut self, direction: Option<Direction>) -> Self {
        self.direction = direction;
        self
    }

    /// Whether a date partition may hold matching events
    pub fn wants_day(&self, day: NaiveDate) -> bool {
        match (&self.date_buckets, &self.time_range) {
            (Some(buckets), _) => buckets.contains(day),
            (None, Some(range)) => range.date_buckets().is_some_and(|b| b.contains(day)),
            (None, None) => true,
        }
    }

    #[inline]
    pub fn wants_direction(&self, direction: Direction) -> bool {
        self.direction.is_none_or(|d| d == direction)
    }

    #[inline]
    pub fn wants_timestamp(&self, ts: DateTime<Utc>) -> bool {
        self.time_range.is_none_or(|r| r.contains(ts))
    }
}

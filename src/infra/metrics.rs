//! Lock-free query metrics and reporting
//!
//! Counters are atomics so concurrent queries can record without a mutex.
//! Only `report()` takes a lock, for the elapsed-time bookkeeping.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters only,
//! never use them for coordination.

use crate::io::source::ScanStats;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Exponential latency bucket boundaries (milliseconds)
/// Buckets: ≤1, ≤2, ≤4, ... ≤16384, >16384
const BUCKET_BOUNDS: [u64; 15] =
    [1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192, 16384];
const NUM_BUCKETS: usize = 16;

/// Upper bound reported for each bucket (last bucket uses 2x the previous bound)
const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
    [1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768];

#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket holding the given percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;
    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Query metrics for one source
pub struct Metrics {
    /// Queries completed (monotonic)
    queries_total: AtomicU64,
    /// Queries that returned an error (monotonic)
    queries_failed: AtomicU64,
    /// Well-formed events read (monotonic)
    events_scanned: AtomicU64,
    /// Malformed records skipped (monotonic)
    records_skipped: AtomicU64,
    /// Date partitions eliminated before reading (monotonic)
    partitions_pruned: AtomicU64,
    /// Queries since last report (reset on report)
    queries_since_report: AtomicU64,
    /// Sum of latencies in milliseconds (reset on report)
    latency_sum_ms: AtomicU64,
    /// Max latency in milliseconds (reset on report)
    latency_max_ms: AtomicU64,
    /// Latency histogram (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            queries_total: AtomicU64::new(0),
            queries_failed: AtomicU64::new(0),
            events_scanned: AtomicU64::new(0),
            records_skipped: AtomicU64::new(0),
            partitions_pruned: AtomicU64::new(0),
            queries_since_report: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            latency_max_ms: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a completed query with its latency and scan counters
    #[inline]
    pub fn record_query(&self, latency: Duration, scan: &ScanStats) {
        let latency_ms = latency.as_millis().min(u128::from(u64::MAX)) as u64;
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        self.queries_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_ms, latency_ms);

        self.events_scanned.fetch_add(scan.scanned, Ordering::Relaxed);
        self.records_skipped.fetch_add(scan.skipped, Ordering::Relaxed);
        self.partitions_pruned.fetch_add(scan.pruned, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failure(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn queries_total(&self) -> u64 {
        self.queries_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn events_scanned(&self) -> u64 {
        self.events_scanned.load(Ordering::Relaxed)
    }

    /// Snapshot the counters and reset the per-report latency statistics
    pub fn report(&self) -> MetricsSummary {
        let queries = self.queries_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_ms.swap(0, Ordering::Relaxed);
        let latency_max = self.latency_max_ms.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };
        let queries_per_sec = if elapsed.as_secs_f64() > 0.0 {
            queries as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            queries_total: self.queries_total.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            queries_per_sec,
            events_scanned: self.events_scanned.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            partitions_pruned: self.partitions_pruned.load(Ordering::Relaxed),
            avg_latency_ms: if queries > 0 { latency_sum / queries } else { 0 },
            max_latency_ms: latency_max,
            lat_buckets,
            lat_p50_ms: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_ms: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_ms: percentile_from_buckets(&lat_buckets, 0.99),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub queries_total: u64,
    pub queries_failed: u64,
    pub queries_per_sec: f64,
    pub events_scanned: u64,
    pub records_skipped: u64,
    pub partitions_pruned: u64,
    pub avg_latency_ms: u64,
    pub max_latency_ms: u64,
    /// Bounds: ≤1, ≤2, ≤4, ... ≤16384, >16384 ms
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_ms: u64,
    pub lat_p95_ms: u64,
    pub lat_p99_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self, source: &str) {
        info!(
            source = %source,
            queries = %self.queries_total,
            failed = %self.queries_failed,
            queries_per_sec = format!("{:.2}", self.queries_per_sec),
            events_scanned = %self.events_scanned,
            records_skipped = %self.records_skipped,
            partitions_pruned = %self.partitions_pruned,
            avg_ms = %self.avg_latency_ms,
            max_ms = %self.max_latency_ms,
            p50_ms = %self.lat_p50_ms,
            p95_ms = %self.lat_p95_ms,
            p99_ms = %self.lat_p99_ms,
            "metrics"
        );
    }
}

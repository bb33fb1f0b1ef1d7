//! Benchmark runner - the same query against several sources
//!
//! Each source gets `warmup_runs` untimed runs, then `runs` timed runs recorded in
//! its own [`Metrics`]. The result of the last timed run per source is compared
//! against the first source so a faster backend cannot hide a wrong answer.

use crate::domain::{Direction, Limit, Session, TimeRange, WindowSpec};
use crate::error::{AnalyticsError, Result};
use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::io::source::{EventSource, ScanStats};
use crate::services::distribution::{query_durations, timestamp_distribution};
use crate::services::frequency::{query_frequent, FrequencyRecord};
use crate::services::quantile::QuantileSummary;
use crate::services::sessionizer::{query_sessions, SessionQuery};
use serde::Serialize;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

/// Query to benchmark
#[derive(Debug, Clone)]
pub enum BenchQuery {
    Frequency { window: WindowSpec, direction: Option<Direction>, limit: Limit },
    Sessions(SessionQuery),
    Durations { query: SessionQuery, k: usize },
    Timestamps { range: Option<TimeRange>, direction: Option<Direction>, k: usize },
}

impl BenchQuery {
    pub fn name(&self) -> &'static str {
        match self {
            BenchQuery::Frequency { .. } => "frequency",
            BenchQuery::Sessions(_) => "sessions",
            BenchQuery::Durations { .. } => "durations",
            BenchQuery::Timestamps { .. } => "timestamps",
        }
    }

    /// Run once against a source
    pub fn execute(&self, source: &dyn EventSource) -> Result<(QueryResult, ScanStats)> {
        Ok(match self {
            BenchQuery::Frequency { window, direction, limit } => {
                let outcome = query_frequent(source, window, *direction, *limit)?;
                (QueryResult::Frequency(outcome.records), outcome.scan)
            }
            BenchQuery::Sessions(query) => {
                let outcome = query_sessions(source, query)?;
                (QueryResult::Sessions(outcome.sessions), outcome.scan)
            }
            BenchQuery::Durations { query, k } => {
                let outcome = query_durations(source, query, *k)?;
                (QueryResult::Distribution(outcome.summary), outcome.scan)
            }
            BenchQuery::Timestamps { range, direction, k } => {
                let outcome = timestamp_distribution(source, *range, *direction, *k)?;
                (QueryResult::Distribution(outcome.summary), outcome.scan)
            }
        })
    }
}

/// Output of one query run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "rows", rename_all = "snake_case")]
pub enum QueryResult {
    Frequency(Vec<FrequencyRecord>),
    Sessions(Vec<Session>),
    Distribution(Option<QuantileSummary>),
}

impl QueryResult {
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Frequency(rows) => rows.len(),
            QueryResult::Sessions(rows) => rows.len(),
            QueryResult::Distribution(summary) => usize::from(summary.is_some()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two sources produced the same answer.
    ///
    /// Sketch estimates depend on the order values arrive in, so distributions
    /// only have to agree on how many values they summarized.
    pub fn agrees_with(&self, other: &QueryResult) -> bool {
        match (self, other) {
            (QueryResult::Distribution(Some(a)), QueryResult::Distribution(Some(b))) => {
                a.count == b.count
            }
            _ => self == other,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BenchSettings {
    pub warmup_runs: u32,
    pub runs: u32,
}

/// Timings and result for one source
#[derive(Debug, Clone, Serialize)]
pub struct SourceRun {
    pub source: String,
    pub metrics: MetricsSummary,
    pub rows: usize,
    pub agrees: bool,
    pub result: QueryResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub run_id: String,
    /// Wall-clock start, RFC 3339 UTC
    pub started_at: String,
    pub query: &'static str,
    pub warmup_runs: u32,
    pub runs: u32,
    pub sources: Vec<SourceRun>,
    pub consistent: bool,
}

/// Benchmark `query` against every source in order.
///
/// `settings.runs` must be at least 1. A source failure aborts the whole run;
/// no partial report is returned.
pub fn run_bench(
    sources: &[&dyn EventSource],
    query: &BenchQuery,
    settings: BenchSettings,
) -> Result<BenchReport> {
    if settings.runs == 0 {
        return Err(AnalyticsError::invalid("bench needs at least one timed run"));
    }
    let run_id = Uuid::now_v7().to_string();
    let started_at =
        OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::from("unknown"));
    let runs = settings.runs;
    info!(
        run_id = %run_id,
        query = %query.name(),
        sources = %sources.len(),
        warmup_runs = %settings.warmup_runs,
        runs = %runs,
        "bench_started"
    );

    let mut reports: Vec<SourceRun> = Vec::with_capacity(sources.len());
    for &source in sources {
        for _ in 0..settings.warmup_runs {
            query.execute(source)?;
        }

        let metrics = Metrics::new();
        let mut last = None;
        for _ in 0..runs {
            let started = Instant::now();
            match query.execute(source) {
                Ok((result, scan)) => {
                    metrics.record_query(started.elapsed(), &scan);
                    last = Some(result);
                }
                Err(e) => {
                    metrics.record_failure();
                    warn!(
                        run_id = %run_id,
                        source = %source.name(),
                        kind = %e.kind(),
                        error = %e,
                        "bench_query_failed"
                    );
                    return Err(e);
                }
            }
        }

        let summary = metrics.report();
        summary.log(source.name());

        // runs >= 1, so a result exists
        let Some(result) = last else { continue };
        let agrees = reports.first().is_none_or(|first| first.result.agrees_with(&result));
        if !agrees {
            warn!(run_id = %run_id, source = %source.name(), "bench_results_differ");
        }
        reports.push(SourceRun {
            source: source.name().to_string(),
            metrics: summary,
            rows: result.len(),
            agrees,
            result,
        });
    }

    let consistent = reports.iter().all(|r| r.agrees);
    info!(run_id = %run_id, query = %query.name(), consistent = %consistent, "bench_complete");
    Ok(BenchReport {
        run_id,
        started_at,
        query: query.name(),
        warmup_runs: settings.warmup_runs,
        runs,
        sources: reports,
        consistent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityKey, Event};
    use crate::io::memory::MemorySource;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn events() -> Vec<Event> {
        let key = EntityKey::parse("A", "A-77").unwrap();
        (0..10)
            .map(|i| {
                let ts = Utc.with_ymd_and_hms(2025, 1, 1 + i, 12, 0, 0).unwrap();
                if i % 2 == 0 {
                    Event::entry(ts, key.clone())
                } else {
                    Event::exit(ts, key.clone())
                }
            })
            .collect()
    }

    fn frequency() -> BenchQuery {
        BenchQuery::Frequency {
            window: WindowSpec::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), 30, 3).unwrap(),
            direction: None,
            limit: Limit::new(10).unwrap(),
        }
    }

    #[test]
    fn test_sources_with_same_data_agree() {
        let a = MemorySource::new("left", events());
        let mut reversed = events();
        reversed.reverse();
        let b = MemorySource::new("right", reversed);

        let settings = BenchSettings { warmup_runs: 1, runs: 3 };
        let sources: [&dyn EventSource; 2] = [&a, &b];
        let report = run_bench(&sources, &frequency(), settings).unwrap();

        assert!(report.consistent);
        assert_eq!(report.sources.len(), 2);
        assert_eq!(report.sources[0].metrics.queries_total, 3);
        assert_eq!(report.sources[1].rows, 1);
        assert!(Uuid::parse_str(&report.run_id).is_ok());
        assert!(OffsetDateTime::parse(&report.started_at, &Rfc3339).is_ok());
    }

    #[test]
    fn test_differing_sources_flagged() {
        let a = MemorySource::new("full", events());
        let b = MemorySource::new("partial", events().into_iter().take(2).collect());

        let sources: [&dyn EventSource; 2] = [&a, &b];
        let report =
            run_bench(&sources, &frequency(), BenchSettings { warmup_runs: 0, runs: 1 }).unwrap();
        assert!(!report.consistent);
        assert!(report.sources[0].agrees);
        assert!(!report.sources[1].agrees);
    }

    #[test]
    fn test_zero_runs_rejected() {
        let a = MemorySource::new("mem", events());
        let sources: [&dyn EventSource; 1] = [&a];
        let err = run_bench(&sources, &frequency(), BenchSettings { warmup_runs: 1, runs: 0 }).unwrap_err();

        assert!(matches!(err, AnalyticsError::InvalidParameters(_)));
    }

    #[test]
    fn test_session_query_bench() {
        let a = MemorySource::new("mem", events());
        let query = BenchQuery::Sessions(SessionQuery::new(Limit::new(3).unwrap()));
        let sources: [&dyn EventSource; 1] = [&a];
        let report = run_bench(&sources, &query, BenchSettings { warmup_runs: 0, runs: 2 }).unwrap();

        assert_eq!(report.query, "sessions");
        assert_eq!(report.sources[0].rows, 3);
    }
}

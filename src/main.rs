//! crossing-analytics - border crossing analytics CLI
//!
//! Runs the analytical queries against a row-oriented table source or a
//! hive-partitioned source and compares the two.
//!
//! Module structure:
//! - `domain/` - Core types (Event, EntityKey, Session, WindowSpec)
//! - `io/` - Event sources and JSON lines output
//! - `services/` - Queries (sessions, frequency, distributions, ranking, bench)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use crossing_analytics::domain::{Direction, EntityKey, Event, Limit, TimeRange, WindowSpec};
use crossing_analytics::infra::{Config, Metrics};
use crossing_analytics::io::jsonl::JsonlRecords;
use crossing_analytics::io::partitioned::DEFAULT_ROWS_PER_PART;
use crossing_analytics::io::{EventSource, JsonLines, Output, PartitionedSource, ScanStats, TableSource};
use crossing_analytics::services::bench::{run_bench, BenchQuery, BenchSettings};
use crossing_analytics::services::distribution::{query_durations, timestamp_distribution};
use crossing_analytics::services::frequency::query_frequent;
use crossing_analytics::services::quantile::QuantileSummary;
use crossing_analytics::services::sessionizer::{query_sessions, SessionQuery, UnmatchedEntries};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Border crossing analytics over table and partitioned event stores
#[derive(Parser, Debug)]
#[command(name = "crossing-analytics", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Source to query
    #[arg(long, global = true, value_enum, default_value_t = SourceKind::Partitioned)]
    source: SourceKind,

    /// Read every partition even when the time range allows skipping some
    #[arg(long, global = true)]
    no_pruning: bool,

    /// Emit logs as JSON objects
    #[arg(long, global = true)]
    json_logs: bool,

    /// Append results to this file instead of writing them to stdout
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    Table,
    Partitioned,
}

/// Optional entry-time range given as a start date and a number of days
#[derive(clap::Args, Debug, Clone)]
struct RangeArgs {
    /// First UTC day of the range (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Length of the range in days
    #[arg(long, allow_negative_numbers = true, requires = "from")]
    days: Option<i64>,
}

impl RangeArgs {
    fn time_range(&self) -> anyhow::Result<Option<TimeRange>> {
        let Some(from) = self.from else {
            return Ok(None);
        };
        let days = self.days.unwrap_or(1);
        Ok(Some(WindowSpec::new(from, days, 0)?.time_range()))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Query(QueryCommand),
    /// Run one query against both sources and compare timings and results
    Compare {
        #[arg(value_enum)]
        query: CompareQuery,
        #[arg(long)]
        runs: Option<u32>,
        #[arg(long)]
        warmup: Option<u32>,
    },
    /// Import raw JSONL crossings into both the table and the partitioned layout
    Load {
        /// Incoming (entry) crossings
        #[arg(long)]
        incoming: PathBuf,
        /// Outgoing (exit) crossings
        #[arg(long)]
        outgoing: PathBuf,
        #[arg(long, default_value_t = DEFAULT_ROWS_PER_PART)]
        rows_per_part: usize,
    },
}

/// Queries answered from a single source
#[derive(Subcommand, Debug)]
enum QueryCommand {
    /// Longest stays across all vehicles
    Sessions {
        #[arg(long, allow_negative_numbers = true)]
        limit: Option<i64>,
        #[command(flatten)]
        range: RangeArgs,
        /// Report entries without a later exit as open sessions
        #[arg(long)]
        retain_open: bool,
    },
    /// Vehicles seen more often than the threshold inside a window
    Frequency {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long, allow_negative_numbers = true)]
        days: Option<i64>,
        #[arg(long, allow_negative_numbers = true)]
        threshold: Option<i64>,
        #[arg(long, allow_negative_numbers = true)]
        limit: Option<i64>,
        /// Count only one direction (entry|exit)
        #[arg(long)]
        direction: Option<Direction>,
    },
    /// Longest stays of a single vehicle
    Lookup {
        #[arg(long)]
        region: String,
        #[arg(long)]
        plate: String,
        #[arg(long, allow_negative_numbers = true)]
        limit: Option<i64>,
    },
    /// p50/p90/p99 of stay durations in hours
    Durations {
        #[command(flatten)]
        range: RangeArgs,
    },
    /// p50/p90/p99 of crossing timestamps in epoch hours
    Timestamps {
        #[command(flatten)]
        range: RangeArgs,
        #[arg(long)]
        direction: Option<Direction>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CompareQuery {
    Frequency,
    Sessions,
    Durations,
    Timestamps,
}

/// One line of distribution output
#[derive(Serialize)]
struct DistributionLine<'a> {
    query: &'a str,
    no_data: bool,
    summary: Option<QuantileSummary>,
}

fn init_tracing(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-record detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_output(args: &Args) -> anyhow::Result<Output> {
    JsonLines::open(args.output.as_deref()).with_context(|| match &args.output {
        Some(path) => format!("cannot open output file {}", path.display()),
        None => "cannot open stdout".to_string(),
    })
}

fn table_source(config: &Config) -> TableSource {
    TableSource::new(config.table_root())
}

fn partitioned_source(config: &Config, pruning: bool) -> PartitionedSource {
    PartitionedSource::new(config.lake_root(), config.lake_prefix()).with_pruning(pruning)
}

fn window_from(
    config: &Config,
    start: Option<NaiveDate>,
    days: Option<i64>,
    threshold: Option<i64>,
) -> anyhow::Result<WindowSpec> {
    Ok(WindowSpec::new(
        start.unwrap_or(config.window_start()),
        days.unwrap_or(config.window_length_days()),
        threshold.unwrap_or(config.threshold()),
    )?)
}

fn limit_or(value: Option<i64>, fallback: crossing_analytics::error::Result<Limit>) -> anyhow::Result<Limit> {
    Ok(match value {
        Some(v) => Limit::new(v)?,
        None => fallback?,
    })
}

/// Time a single query and record it
fn timed<T>(
    metrics: &Metrics,
    source: &dyn EventSource,
    run: impl FnOnce() -> crossing_analytics::error::Result<(T, ScanStats)>,
) -> anyhow::Result<T> {
    let started = Instant::now();
    match run() {
        Ok((value, scan)) => {
            metrics.record_query(started.elapsed(), &scan);
            Ok(value)
        }
        Err(e) => {
            metrics.record_failure();
            warn!(source = %source.name(), kind = %e.kind(), error = %e, "query_failed");
            Err(e).with_context(|| format!("query against {} source failed", source.name()))
        }
    }
}

fn run_query(args: &Args, config: &Config, command: &QueryCommand) -> anyhow::Result<()> {
    let table = table_source(config);
    let partitioned = partitioned_source(config, !args.no_pruning);
    let source: &dyn EventSource = match args.source {
        SourceKind::Table => &table,
        SourceKind::Partitioned => &partitioned,
    };
    let metrics = Metrics::new();
    let mut out = open_output(args)?;

    match command {
        QueryCommand::Sessions { limit, range, retain_open } => {
            let mut query = SessionQuery::new(limit_or(*limit, config.sessions_limit())?);
            if let Some(r) = range.time_range()? {
                query = query.with_entry_range(r);
            }
            if *retain_open {
                query = query.with_unmatched(UnmatchedEntries::RetainOpen);
            }
            let sessions = timed(&metrics, source, || {
                query_sessions(source, &query).map(|o| (o.sessions, o.scan))
            })?;
            out.write_all(&sessions)?;
        }
        QueryCommand::Frequency { start, days, threshold, limit, direction } => {
            let window = window_from(config, *start, *days, *threshold)?;
            let limit = limit_or(*limit, config.frequency_limit())?;
            let records = timed(&metrics, source, || {
                query_frequent(source, &window, *direction, limit).map(|o| (o.records, o.scan))
            })?;
            out.write_all(&records)?;
        }
        QueryCommand::Lookup { region, plate, limit } => {
            let key = EntityKey::parse(region, plate)
                .with_context(|| format!("invalid vehicle '{}'/'{}'", region, plate))?;
            let query = SessionQuery::new(limit_or(*limit, config.lookup_limit())?).with_key(key);
            let sessions = timed(&metrics, source, || {
                query_sessions(source, &query).map(|o| (o.sessions, o.scan))
            })?;
            out.write_all(&sessions)?;
        }
        QueryCommand::Durations { range } => {
            let mut query = SessionQuery::new(Limit::new(0)?);
            if let Some(r) = range.time_range()? {
                query = query.with_entry_range(r);
            }
            let summary = timed(&metrics, source, || {
                query_durations(source, &query, config.sketch_k()).map(|o| (o.summary, o.scan))
            })?;
            out.write(&DistributionLine { query: "durations", no_data: summary.is_none(), summary })?;
        }
        QueryCommand::Timestamps { range, direction } => {
            let range = range.time_range()?;
            let summary = timed(&metrics, source, || {
                timestamp_distribution(source, range, *direction, config.sketch_k())
                    .map(|o| (o.summary, o.scan))
            })?;
            out.write(&DistributionLine { query: "timestamps", no_data: summary.is_none(), summary })?;
        }
    }

    out.finish()?;
    metrics.report().log(source.name());
    Ok(())
}

fn run_compare(
    args: &Args,
    config: &Config,
    query: CompareQuery,
    runs: Option<u32>,
    warmup: Option<u32>,
) -> anyhow::Result<()> {
    let table = table_source(config);
    let partitioned = partitioned_source(config, !args.no_pruning);

    let window = config.window_spec()?;
    let bench_query = match query {
        CompareQuery::Frequency => BenchQuery::Frequency {
            window,
            direction: None,
            limit: config.frequency_limit()?,
        },
        CompareQuery::Sessions => BenchQuery::Sessions(SessionQuery::new(config.sessions_limit()?)),
        CompareQuery::Durations => BenchQuery::Durations {
            query: SessionQuery::new(config.sessions_limit()?),
            k: config.sketch_k(),
        },
        CompareQuery::Timestamps => {
            BenchQuery::Timestamps { range: Some(window.time_range()), direction: None, k: config.sketch_k() }
        }
    };
    let settings = BenchSettings {
        warmup_runs: warmup.unwrap_or(config.warmup_runs()),
        runs: runs.unwrap_or(config.runs()),
    };

    let sources: [&dyn EventSource; 2] = [&table, &partitioned];
    let report = run_bench(&sources, &bench_query, settings)?;
    if !report.consistent {
        warn!(run_id = %report.run_id, "sources_disagree");
    }
    let mut out = open_output(args)?;
    out.write(&report)?;
    out.finish()?;
    Ok(())
}

fn run_load(
    args: &Args,
    config: &Config,
    incoming: &Path,
    outgoing: &Path,
    rows_per_part: usize,
) -> anyhow::Result<()> {
    let mut events: Vec<Event> = Vec::new();
    let mut skipped = 0u64;
    for (path, direction) in [(incoming, Direction::Entry), (outgoing, Direction::Exit)] {
        let records = JsonlRecords::open(path, direction)
            .with_context(|| format!("cannot open {}", path.display()))?;
        for record in records {
            match record {
                Ok(event) => events.push(event),
                Err(crossing_analytics::error::RecordError::Malformed(reason)) => {
                    skipped += 1;
                    tracing::debug!(path = %path.display(), reason = %reason, "record_skipped");
                }
                Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
            }
        }
    }
    events.sort_by_key(|e| e.timestamp);
    info!(events = %events.len(), skipped = %skipped, "raw_events_loaded");

    let rows = table_source(config)
        .write_events(&events)
        .with_context(|| format!("writing table under {}", config.table_root().display()))?;
    let files = partitioned_source(config, !args.no_pruning)
        .write_events(&events, rows_per_part)
        .with_context(|| format!("writing partitions under {}", config.lake_root().display()))?;

    let mut out = open_output(args)?;
    out.write(&serde_json::json!({ "rows": rows, "part_files": files, "skipped": skipped }))?;
    out.finish()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "crossing_analytics_starting");

    let config = Config::load(args.config.as_deref());
    info!(
        config_file = %config.config_file(),
        table_root = %config.table_root().display(),
        lake_root = %config.lake_root().display(),
        lake_prefix = %config.lake_prefix(),
        window_start = %config.window_start(),
        window_days = %config.window_length_days(),
        threshold = %config.threshold(),
        sketch_k = %config.sketch_k(),
        "config_loaded"
    );

    match &args.command {
        Command::Compare { query, runs, warmup } => run_compare(&args, &config, *query, *runs, *warmup),
        Command::Load { incoming, outgoing, rows_per_part } => {
            run_load(&args, &config, incoming, outgoing, *rows_per_part)
        }
        Command::Query(command) => run_query(&args, &config, command),
    }
}

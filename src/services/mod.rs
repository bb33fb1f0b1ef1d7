//! Services - the analytical queries
//!
//! - `sessionizer` - entry/exit pairing into stay sessions
//! - `frequency` - windowed per-entity counts with a strict threshold
//! - `quantile` - KLL sketch for p50/p90/p99
//! - `distribution` - duration and timestamp distributions
//! - `ranking` - deterministic top-K
//! - `bench` - runs one query against several sources and compares them

pub mod bench;
pub mod distribution;
pub mod frequency;
pub mod quantile;
pub mod ranking;
pub mod sessionizer;

// Re-export commonly used types
pub use bench::{run_bench, BenchQuery, BenchReport, BenchSettings, QueryResult};
pub use distribution::{duration_distribution, query_durations, timestamp_distribution};
pub use frequency::{aggregate, query_frequent, FrequencyRecord};
pub use quantile::{QuantileSketch, QuantileSummary};
pub use ranking::{top_k, Ranked};
pub use sessionizer::{query_sessions, reconstruct, SessionQuery, SessionReport, UnmatchedEntries};

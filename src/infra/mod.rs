//! Infrastructure - configuration and metrics
//!
//! - `config` - CLI defaults (TOML loading)
//! - `metrics` - lock-free query metrics

pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use config::Config;
pub use metrics::{Metrics, MetricsSummary};

//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! The file only supplies defaults for the CLI. Library calls take their
//! window, limits and sketch size as explicit arguments.

use crate::domain::{Limit, WindowSpec};
use crate::services::quantile::DEFAULT_K;
use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct TableSourceConfig {
    #[serde(default = "default_table_root")]
    pub root: PathBuf,
}

impl Default for TableSourceConfig {
    fn default() -> Self {
        Self { root: default_table_root() }
    }
}

fn default_table_root() -> PathBuf {
    PathBuf::from("data/table")
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartitionedSourceConfig {
    #[serde(default = "default_lake_root")]
    pub root: PathBuf,
    /// Key prefix below the root (the bucket "folder")
    #[serde(default = "default_lake_prefix")]
    pub prefix: String,
}

impl Default for PartitionedSourceConfig {
    fn default() -> Self {
        Self { root: default_lake_root(), prefix: default_lake_prefix() }
    }
}

fn default_lake_root() -> PathBuf {
    PathBuf::from("data/lake")
}

fn default_lake_prefix() -> String {
    "vehicles".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub table: TableSourceConfig,
    #[serde(default)]
    pub partitioned: PartitionedSourceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_start")]
    pub start: NaiveDate,
    /// Signed so a negative value is reported as invalid, not as a parse error
    #[serde(default = "default_window_days")]
    pub length_days: i64,
    #[serde(default = "default_threshold")]
    pub threshold: i64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            start: default_window_start(),
            length_days: default_window_days(),
            threshold: default_threshold(),
        }
    }
}

fn default_window_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default()
}

fn default_window_days() -> i64 {
    30
}

fn default_threshold() -> i64 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Rows returned by the frequency query
    #[serde(default = "default_frequency_limit")]
    pub frequency: i64,
    /// Rows returned by the longest-stay query
    #[serde(default = "default_sessions_limit")]
    pub sessions: i64,
    /// Rows returned by a single-vehicle lookup
    #[serde(default = "default_lookup_limit")]
    pub lookup: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            frequency: default_frequency_limit(),
            sessions: default_sessions_limit(),
            lookup: default_lookup_limit(),
        }
    }
}

fn default_frequency_limit() -> i64 {
    200
}

fn default_sessions_limit() -> i64 {
    100
}

fn default_lookup_limit() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct SketchConfig {
    #[serde(default = "default_sketch_k")]
    pub k: usize,
}

impl Default for SketchConfig {
    fn default() -> Self {
        Self { k: default_sketch_k() }
    }
}

fn default_sketch_k() -> usize {
    DEFAULT_K
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchConfig {
    #[serde(default = "default_warmup_runs")]
    pub warmup_runs: u32,
    #[serde(default = "default_runs")]
    pub runs: u32,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self { warmup_runs: default_warmup_runs(), runs: default_runs() }
    }
}

fn default_warmup_runs() -> u32 {
    1
}

fn default_runs() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub sketch: SketchConfig,
    #[serde(default)]
    pub bench: BenchConfig,
}

/// Main configuration struct used by the CLI
#[derive(Debug, Clone)]
pub struct Config {
    table_root: PathBuf,
    lake_root: PathBuf,
    lake_prefix: String,
    window: WindowConfig,
    limits: LimitsConfig,
    sketch_k: usize,
    warmup_runs: u32,
    runs: u32,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            table_root: toml_config.sources.table.root,
            lake_root: toml_config.sources.partitioned.root,
            lake_prefix: toml_config.sources.partitioned.prefix,
            window: toml_config.window,
            limits: toml_config.limits,
            sketch_k: toml_config.sketch.k,
            warmup_runs: toml_config.bench.warmup_runs,
            runs: toml_config.bench.runs,
            config_file,
        }
    }

    /// Determine config file path: an explicit `--config` value, then the environment
    pub fn resolve_config_path(explicit: Option<&str>) -> String {
        if let Some(path) = explicit {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load a specific file, falling back to defaults when it is missing or invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(&path) {
            Ok(config) => {
                info!(config_file = %config.config_file, "config_loaded");
                config
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_fallback_to_defaults");
                Self::default()
            }
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(explicit: Option<&str>) -> Self {
        Self::load_from_path(Self::resolve_config_path(explicit))
    }

    pub fn table_root(&self) -> &Path {
        &self.table_root
    }

    pub fn lake_root(&self) -> &Path {
        &self.lake_root
    }

    pub fn lake_prefix(&self) -> &str {
        &self.lake_prefix
    }

    pub fn window_start(&self) -> NaiveDate {
        self.window.start
    }

    pub fn window_length_days(&self) -> i64 {
        self.window.length_days
    }

    pub fn threshold(&self) -> i64 {
        self.window.threshold
    }

    /// Validated window from the configured values
    pub fn window_spec(&self) -> crate::error::Result<WindowSpec> {
        WindowSpec::new(self.window.start, self.window.length_days, self.window.threshold)
    }

    pub fn frequency_limit(&self) -> crate::error::Result<Limit> {
        Limit::new(self.limits.frequency)
    }

    pub fn sessions_limit(&self) -> crate::error::Result<Limit> {
        Limit::new(self.limits.sessions)
    }

    pub fn lookup_limit(&self) -> crate::error::Result<Limit> {
        Limit::new(self.limits.lookup)
    }

    pub fn sketch_k(&self) -> usize {
        self.sketch_k
    }

    pub fn warmup_runs(&self) -> u32 {
        self.warmup_runs
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

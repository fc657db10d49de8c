//! Exporter configuration: TOML file format plus list-valued option parsing.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_OUTPUT_FILE: &str = "edgestat.data";
pub const DEFAULT_PORT: u16 = 9145;
pub const DEFAULT_PATH: &str = "/metrics";
pub const DEFAULT_API_BASE: &str = "https://api.fastly.com";
pub const DEFAULT_RT_BASE: &str = "https://rt.fastly.com";
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid percentile {0:?}: expected an integer between 1 and 100")]
    Percentile(String),

    #[error("invalid http path {0:?}: must start with '/'")]
    Path(String),
}

/// Upstream API credential. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Every runtime setting the exporter consumes.
///
/// All fields are optional in the file; the daemon layers CLI flags and
/// environment variables on top before calling [`ExporterConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub api_key: Option<ApiKey>,
    /// Comma-separated service ids; empty tracks every service.
    pub service_ids: String,
    /// Semicolon-separated metric name substrings to drop.
    pub ignore_metrics: String,
    pub ignore_zero_counters: bool,
    pub metric_prefix: String,
    /// 0 disables the idle background refresh.
    pub background_interval_secs: u64,
    /// Comma-separated integer percentiles; empty disables summaries.
    pub percentiles: String,
    pub export_histograms: bool,
    pub output_dir: PathBuf,
    pub output_file: String,
    pub port: u16,
    pub path: String,
    pub api_base: String,
    pub rt_base: String,
    /// 0 leaves upstream calls unbounded.
    pub upstream_timeout_secs: u64,
    pub bypass_initial_test: bool,
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            service_ids: String::new(),
            ignore_metrics: String::new(),
            ignore_zero_counters: false,
            metric_prefix: String::new(),
            background_interval_secs: 0,
            percentiles: String::new(),
            export_histograms: true,
            output_dir: std::env::temp_dir(),
            output_file: DEFAULT_OUTPUT_FILE.to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            rt_base: DEFAULT_RT_BASE.to_string(),
            upstream_timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
            bypass_initial_test: false,
            verbose: false,
            log_file: None,
        }
    }
}

impl ExporterConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check required settings and list syntax.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.api_key {
            Some(key) if !key.expose().trim().is_empty() => {}
            _ => return Err(ConfigError::Missing("api_key")),
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::Path(self.path.clone()));
        }
        self.percentile_list()?;
        Ok(())
    }

    pub fn service_filter(&self) -> Vec<String> {
        parse_csv(&self.service_ids)
    }

    pub fn ignore_list(&self) -> IgnoreList {
        IgnoreList::parse(&self.ignore_metrics)
    }

    pub fn percentile_list(&self) -> Result<Vec<u32>, ConfigError> {
        parse_percentiles(&self.percentiles)
    }

    /// Location of the persisted snapshot.
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_file)
    }

    pub fn background_interval(&self) -> Option<Duration> {
        (self.background_interval_secs > 0)
            .then(|| Duration::from_secs(self.background_interval_secs))
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        (self.upstream_timeout_secs > 0).then(|| Duration::from_secs(self.upstream_timeout_secs))
    }
}

/// Split a comma-separated list, trimming entries and dropping empties.
pub fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_percentiles(raw: &str) -> Result<Vec<u32>, ConfigError> {
    parse_csv(raw)
        .into_iter()
        .map(|entry| match entry.parse::<u32>() {
            Ok(p) if (1..=100).contains(&p) => Ok(p),
            _ => Err(ConfigError::Percentile(entry)),
        })
        .collect()
}

/// Metric names to drop during merge, matched by substring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    patterns: Vec<String>,
}

impl IgnoreList {
    /// Parse a semicolon-separated list. Empty entries are dropped since an
    /// empty substring would match every name.
    pub fn parse(raw: &str) -> Self {
        let patterns = raw
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self { patterns }
    }

    pub fn matches(&self, metric: &str) -> bool {
        self.patterns.iter().any(|p| metric.contains(p.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

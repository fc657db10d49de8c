//! Command-line and environment options, layered over the config file.

use std::path::PathBuf;

use clap::Parser;

use edgestat_core::{ApiKey, ConfigError, ExporterConfig};

#[derive(Debug, Parser)]
#[command(
    name = "edgestatd",
    version,
    about = "Prometheus exporter for the Fastly real-time statistics API"
)]
pub struct Cli {
    /// TOML configuration file; flags and environment override its values.
    #[arg(short = 'c', long = "config", alias = "configuration-file", env = "EDGESTAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Upstream API key.
    #[arg(short = 'k', long, alias = "fastly-key", env = "EDGESTAT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Comma-separated service ids to track (default: all).
    #[arg(short = 'i', long, alias = "fastly-service-id", env = "EDGESTAT_SERVICE_IDS")]
    pub service_ids: Option<String>,

    /// Semicolon-separated metric name substrings to drop.
    #[arg(long, env = "EDGESTAT_IGNORE_METRICS")]
    pub ignore_metrics: Option<String>,

    /// Drop counters whose value is zero.
    #[arg(long, env = "EDGESTAT_IGNORE_ZERO_COUNTERS")]
    pub ignore_zero_counters: bool,

    /// Prefix for every exported metric name.
    #[arg(long, env = "EDGESTAT_METRIC_PREFIX")]
    pub metric_prefix: Option<String>,

    /// Idle seconds before a background refresh (0 disables).
    #[arg(long = "background-interval", env = "EDGESTAT_BACKGROUND_INTERVAL")]
    pub background_interval_secs: Option<u64>,

    /// Comma-separated percentiles to export as summaries.
    #[arg(long, env = "EDGESTAT_PERCENTILES")]
    pub percentiles: Option<String>,

    /// Do not export raw histogram families.
    #[arg(long, env = "EDGESTAT_NO_EXPORT_HISTOGRAMS")]
    pub no_export_histograms: bool,

    /// Directory holding the snapshot file.
    #[arg(short = 'o', long, env = "EDGESTAT_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Snapshot file name.
    #[arg(short = 'f', long, env = "EDGESTAT_OUTPUT_FILE")]
    pub output_file: Option<String>,

    #[arg(short = 'p', long, env = "EDGESTAT_PORT")]
    pub port: Option<u16>,

    /// HTTP path serving the exposition.
    #[arg(long, env = "EDGESTAT_PATH")]
    pub path: Option<String>,

    #[arg(long, env = "EDGESTAT_API_BASE")]
    pub api_base: Option<String>,

    #[arg(long, env = "EDGESTAT_RT_BASE")]
    pub rt_base: Option<String>,

    /// Per-request upstream timeout in seconds (0 disables).
    #[arg(long = "upstream-timeout", env = "EDGESTAT_UPSTREAM_TIMEOUT")]
    pub upstream_timeout_secs: Option<u64>,

    /// Skip the startup test refresh.
    #[arg(short = 'b', long, env = "EDGESTAT_BYPASS_INITIAL_TEST")]
    pub bypass_initial_test: bool,

    /// Debug logging for edgestat crates.
    #[arg(short = 'v', long, env = "EDGESTAT_VERBOSE")]
    pub verbose: bool,

    /// Append logs to this file as well as stdout.
    #[arg(short = 'l', long, alias = "logs-file", env = "EDGESTAT_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Load the config file (if any), apply overrides, and validate.
    pub fn resolve(self) -> Result<ExporterConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ExporterConfig::from_file(path)?,
            None => ExporterConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(self, config: &mut ExporterConfig) {
        if let Some(key) = self.api_key {
            config.api_key = Some(ApiKey::new(key));
        }
        if let Some(ids) = self.service_ids {
            config.service_ids = ids;
        }
        if let Some(ignore) = self.ignore_metrics {
            config.ignore_metrics = ignore;
        }
        config.ignore_zero_counters |= self.ignore_zero_counters;
        if let Some(prefix) = self.metric_prefix {
            config.metric_prefix = prefix;
        }
        if let Some(secs) = self.background_interval_secs {
            config.background_interval_secs = secs;
        }
        if let Some(percentiles) = self.percentiles {
            config.percentiles = percentiles;
        }
        if self.no_export_histograms {
            config.export_histograms = false;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(file) = self.output_file {
            config.output_file = file;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(path) = self.path {
            config.path = path;
        }
        if let Some(base) = self.api_base {
            config.api_base = base;
        }
        if let Some(base) = self.rt_base {
            config.rt_base = base;
        }
        if let Some(secs) = self.upstream_timeout_secs {
            config.upstream_timeout_secs = secs;
        }
        config.bypass_initial_test |= self.bypass_initial_test;
        config.verbose |= self.verbose;
        if let Some(file) = self.log_file {
            config.log_file = Some(file);
        }
    }
}

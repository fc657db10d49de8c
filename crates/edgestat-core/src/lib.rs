pub mod config;
pub mod types;

pub use config::{ApiKey, ConfigError, ExporterConfig, IgnoreList};
pub use types::*;

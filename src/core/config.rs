//! Configuration loading for the store daemon.
//!
//! The configuration is a single JSON file. Unknown fields are rejected
//! so that typos surface at startup instead of silently disabling a
//! subsystem.

use crate::core::{MetricConfig, Result, StoreError};
use crate::storage::checkpoint::FileFormat;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// The metric schema. Fixed for the lifetime of the process.
    pub metrics: HashMap<String, MetricConfig>,

    /// How long samples stay in memory before the retention sweeper
    /// reclaims their buffers.
    #[serde(with = "humantime_serde")]
    pub retention_in_memory: Duration,

    /// HTTP query/write API.
    pub http_api: HttpConfig,

    pub checkpoints: CheckpointConfig,

    pub archive: ArchiveConfig,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct HttpConfig {
    /// Address to bind to, for example "0.0.0.0:8081".
    pub address: String,
}

/// Checkpointing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct CheckpointConfig {
    /// Time between checkpoint passes.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Root directory for the per-host checkpoint files.
    #[serde(rename = "directory")]
    pub root_dir: PathBuf,

    /// On startup, checkpoints overlapping `now - restore` are loaded
    /// back into memory.
    #[serde(with = "humantime_serde")]
    pub restore: Duration,

    /// On-disk encoding of checkpoint files.
    #[serde(default)]
    pub file_format: FileFormat,
}

/// Archiving configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ArchiveConfig {
    /// Time between archive passes.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Root directory for the packed archives.
    #[serde(rename = "directory")]
    pub root_dir: PathBuf,

    /// Checkpoint files older than `now - retention` are packed away.
    /// Defaults to the archive interval.
    #[serde(default, with = "humantime_serde")]
    pub retention: Option<Duration>,
}

impl ArchiveConfig {
    pub fn retention(&self) -> Duration {
        self.retention.unwrap_or(self.interval)
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Config> {
        let file = File::open(path).map_err(|e| {
            StoreError::config(format!("cannot open config file {}: {e}", path.display()))
        })?;
        let config: Config = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(StoreError::config("no metrics configured"));
        }
        for (name, metric) in &self.metrics {
            if metric.frequency <= 0 {
                return Err(StoreError::config(format!(
                    "metric {name:?} has invalid frequency {}",
                    metric.frequency
                )));
            }
        }
        if self.http_api.address.is_empty() {
            return Err(StoreError::config("http-api.address must not be empty"));
        }
        Ok(())
    }
}

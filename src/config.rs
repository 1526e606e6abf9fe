//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (CYPHER_RUNNER_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [execution]
//! relay_capacity = 100
//! poll_timeout_ms = 10000
//! num_threads = 8
//! driver_mode = "pooled"
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! CYPHER_RUNNER_EXECUTION__MAX_BATCH_SIZE=5000
//! CYPHER_RUNNER_LOGGING__LEVEL=trace
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ENV_PREFIX: &str = "CYPHER_RUNNER_";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Relay queue capacity for statement batches
    #[serde(default = "default_relay_capacity")]
    pub relay_capacity: usize,

    /// Relay queue capacity for partition streaming
    #[serde(default = "default_streaming_capacity")]
    pub streaming_capacity: usize,

    /// How long a consumer waits for a row before logging an idle poll
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Best-effort wait for queueing a statistics row
    #[serde(default = "default_statistics_offer_timeout_ms")]
    pub statistics_offer_timeout_ms: u64,

    /// Default partition count per CPU core
    #[serde(default = "default_partitions_per_cpu")]
    pub partitions_per_cpu: usize,

    /// Maximum items per partition. 0 = no cap.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Number of worker threads in the shared pool
    /// 0 = use all available CPU cores
    #[serde(default)]
    pub num_threads: usize,

    /// How the streaming driver executes partitions
    #[serde(default)]
    pub driver_mode: DriverMode,

    /// Deadline applied to single-fragment runs in milliseconds. 0 = none.
    #[serde(default)]
    pub default_timeout_ms: u64,
}

/// Streaming partition driver mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverMode {
    /// Driver thread executes partitions one after another
    #[default]
    Sequential,

    /// Driver submits partitions to the worker pool and forwards results
    /// in partition order
    Pooled,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_relay_capacity() -> usize {
    100
}
fn default_streaming_capacity() -> usize {
    100_000
}
fn default_poll_timeout_ms() -> u64 {
    10_000
}
fn default_statistics_offer_timeout_ms() -> u64 {
    100
}
fn default_partitions_per_cpu() -> usize {
    100
}
fn default_max_batch_size() -> usize {
    10_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (CYPHER_RUNNER_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }
}

impl ExecutionConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn statistics_offer_timeout(&self) -> Duration {
        Duration::from_millis(self.statistics_offer_timeout_ms)
    }

    /// Worker pool size with 0 resolved to the number of cores
    pub fn worker_threads(&self) -> usize {
        if self.num_threads == 0 {
            num_cpus::get()
        } else {
            self.num_threads
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            relay_capacity: default_relay_capacity(),
            streaming_capacity: default_streaming_capacity(),
            poll_timeout_ms: default_poll_timeout_ms(),
            statistics_offer_timeout_ms: default_statistics_offer_timeout_ms(),
            partitions_per_cpu: default_partitions_per_cpu(),
            max_batch_size: default_max_batch_size(),
            num_threads: 0, // 0 = use all available CPU cores
            driver_mode: DriverMode::Sequential,
            default_timeout_ms: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_execution_config() {
        let config = Config::default();
        assert_eq!(config.execution.relay_capacity, 100);
        assert_eq!(config.execution.streaming_capacity, 100_000);
        assert_eq!(config.execution.poll_timeout(), Duration::from_secs(10));
        assert_eq!(
            config.execution.statistics_offer_timeout(),
            Duration::from_millis(100)
        );
        assert_eq!(config.execution.partitions_per_cpu, 100);
        assert_eq!(config.execution.max_batch_size, 10_000);
        assert_eq!(config.execution.driver_mode, DriverMode::Sequential);
        assert_eq!(config.execution.default_timeout_ms, 0);
    }

    #[test]
    fn test_default_logging_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_worker_threads_resolves_zero() {
        let mut exec = ExecutionConfig::default();
        assert_eq!(exec.worker_threads(), num_cpus::get());
        exec.num_threads = 3;
        assert_eq!(exec.worker_threads(), 3);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[execution]"));
        assert!(toml_str.contains("[logging]"));
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.execution.relay_capacity, 100);
        assert_eq!(back.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[execution]\nrelay_capacity = 7\n").unwrap();
        assert_eq!(config.execution.relay_capacity, 7);
        assert_eq!(config.execution.max_batch_size, 10_000);
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_driver_mode_serde() {
        let json = serde_json::to_string(&DriverMode::Sequential).unwrap();
        assert_eq!(json, "\"sequential\"");
        let json = serde_json::to_string(&DriverMode::Pooled).unwrap();
        assert_eq!(json, "\"pooled\"");
    }
}

#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Configuration for the load balancer core.
//!
//! `Config` is deserialized from YAML and validated before being handed to
//! the rest of the core. Fields the original sampler reserved for future
//! admission control (`high_load_threshold`, `low_load_threshold`,
//! `rebalance_threshold`, `min_task_runtime_ms`) round-trip through
//! [`Config`] but do not influence scheduling; see `original_source/include/config.h`.

use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use validator::Validate;

/// Errors that can occur while loading a configuration file.
#[derive(Error, Debug)]
pub enum Error {
    /// The file could not be opened or its YAML could not be parsed.
    #[error("invalid configuration file `{file}` - {message}")]
    InvalidConfig {
        /// The path to the config file.
        file: String,
        /// The underlying parse error.
        message: String,
    },

    /// The parsed configuration failed field validation.
    #[error("configuration file `{file}` failed validation - {message}")]
    Invalid {
        /// The path to the config file.
        file: String,
        /// The validation failure message.
        message: String,
    },
}

/// Tunables consumed by the monitor, queue, and dispatcher.
///
/// Not `#[serde(deny_unknown_fields)]`: per `original_source/include/config.h`
/// the source format is forward-compatible with fields a given build does
/// not act on.
#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct Config {
    /// Capacity of the task queue.
    #[serde(default = "default_max_tasks")]
    #[validate(range(min = 1))]
    pub max_tasks: usize,

    /// Monitor sampling period, in milliseconds.
    #[serde(default = "default_monitoring_interval_ms")]
    #[validate(range(min = 1))]
    pub monitoring_interval_ms: u64,

    /// Reserved for future admission control.
    #[serde(default = "default_high_load_threshold")]
    pub high_load_threshold: f64,

    /// Reserved for future admission control.
    #[serde(default = "default_low_load_threshold")]
    pub low_load_threshold: f64,

    /// Length of each CPU's usage history ring.
    #[serde(default = "default_load_history_size")]
    #[validate(range(min = 1))]
    pub load_history_size: usize,

    /// Whether the monitor computes `predicted_load` and whether CPU
    /// selection considers it.
    #[serde(default = "default_enable_load_prediction")]
    pub enable_load_prediction: bool,

    /// Raises log verbosity from `INFO` to `DEBUG`.
    #[serde(default = "default_enable_detailed_logging")]
    pub enable_detailed_logging: bool,

    /// Sink path for file-backed logging. `None` logs to stdout only.
    #[serde(default = "default_log_file_path")]
    pub log_file_path: Option<String>,

    /// Reserved for future rebalancing.
    #[serde(default = "default_rebalance_threshold")]
    pub rebalance_threshold: u32,

    /// Reserved for future rebalancing.
    #[serde(default = "default_min_task_runtime_ms")]
    pub min_task_runtime_ms: u64,

    /// Number of CPUs the monitor and dispatcher consider. `None` means
    /// "detect from the host at startup".
    #[serde(default)]
    #[validate(range(min = 1))]
    pub num_cpus: Option<usize>,
}

fn default_max_tasks() -> usize {
    10
}

fn default_monitoring_interval_ms() -> u64 {
    100
}

fn default_high_load_threshold() -> f64 {
    80.0
}

fn default_low_load_threshold() -> f64 {
    20.0
}

fn default_load_history_size() -> usize {
    10
}

fn default_enable_load_prediction() -> bool {
    true
}

fn default_enable_detailed_logging() -> bool {
    true
}

fn default_log_file_path() -> Option<String> {
    Some("./cpu_balancer.log".to_string())
}

fn default_rebalance_threshold() -> u32 {
    30
}

fn default_min_task_runtime_ms() -> u64 {
    5
}

impl Default for Config {
    /// Mirrors `original_source/src/config.c`'s `init_default_config`.
    fn default() -> Self {
        Self {
            max_tasks: default_max_tasks(),
            monitoring_interval_ms: default_monitoring_interval_ms(),
            high_load_threshold: default_high_load_threshold(),
            low_load_threshold: default_low_load_threshold(),
            load_history_size: default_load_history_size(),
            enable_load_prediction: default_enable_load_prediction(),
            enable_detailed_logging: default_enable_detailed_logging(),
            log_file_path: default_log_file_path(),
            rebalance_threshold: default_rebalance_threshold(),
            min_task_runtime_ms: default_min_task_runtime_ms(),
            num_cpus: None,
        }
    }
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load<P: AsRef<Path>>(config_file_path: P) -> Result<Self, Error> {
        let file_name = config_file_path.as_ref().display().to_string();

        debug!("loading {}", file_name);

        let file = File::open(config_file_path).map_err(|err| Error::InvalidConfig {
            file: file_name.clone(),
            message: err.to_string(),
        })?;
        let reader = BufReader::new(file);
        let config: Config = serde_yaml::from_reader(reader).map_err(|err| Error::InvalidConfig {
            file: file_name.clone(),
            message: err.to_string(),
        })?;

        config.validate().map_err(|err| Error::Invalid {
            file: file_name.clone(),
            message: err.to_string(),
        })?;

        debug!("{} loaded", file_name);

        Ok(config)
    }

    /// Resolves [`Config::num_cpus`] against the host when unset.
    pub fn resolved_num_cpus(&self) -> usize {
        self.num_cpus.unwrap_or_else(num_cpus::get)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_matches_original_sampler_defaults() {
        let config = Config::default();
        assert_eq!(config.max_tasks, 10);
        assert_eq!(config.monitoring_interval_ms, 100);
        assert_eq!(config.high_load_threshold, 80.0);
        assert_eq!(config.low_load_threshold, 20.0);
        assert_eq!(config.load_history_size, 10);
        assert!(config.enable_load_prediction);
        assert!(config.enable_detailed_logging);
        assert_eq!(config.log_file_path.as_deref(), Some("./cpu_balancer.log"));
        assert_eq!(config.rebalance_threshold, 30);
        assert_eq!(config.min_task_runtime_ms, 5);
        assert!(config.num_cpus.is_none());
    }

    #[test]
    fn validation_rejects_zero_num_cpus() {
        let mut config = Config::default();
        config.num_cpus = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_max_tasks() {
        let mut config = Config::default();
        config.max_tasks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_accepts_defaults() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn load_missing_file_reports_invalid_config() {
        let err = Config::load("/nonexistent/path/to/config.yaml").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn resolved_num_cpus_falls_back_to_host_detection() {
        let config = Config::default();
        assert!(config.resolved_num_cpus() >= 1);
    }
}

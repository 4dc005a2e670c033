//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main host configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Ceiling on instances that are activating or active at the same time
    #[serde(default = "default_max_running_instances")]
    pub max_running_instances: usize,

    /// Unload verification
    #[serde(default)]
    pub unload: UnloadConfig,

    /// Shadow copies of plugin binaries
    #[serde(default)]
    pub shadow_copy: ShadowCopyConfig,

    /// Warn when an instance is still active this long after a stop request
    #[serde(default = "default_stop_warning_after", with = "humantime_serde")]
    pub stop_warning_after: Duration,

    /// Capacity of the state change channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Instances to create when the host starts
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_running_instances: default_max_running_instances(),
            unload: UnloadConfig::default(),
            shadow_copy: ShadowCopyConfig::default(),
            stop_warning_after: default_stop_warning_after(),
            event_capacity: default_event_capacity(),
            logging: LoggingConfig::default(),
            instances: Vec::new(),
        }
    }
}

/// Unload verification configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnloadConfig {
    /// Number of polls before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between two polls
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for UnloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// Shadow copy configuration
///
/// When enabled, every binary is copied into `directory` before it is loaded,
/// leaving the original file free to be replaced by a newer version.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShadowCopyConfig {
    /// Enable shadow copies
    #[serde(default)]
    pub enabled: bool,

    /// Directory receiving the copies
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, text)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Instance declared in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceConfig {
    /// Instance id, > 0
    pub id: i64,

    /// Unique instance name
    pub name: String,

    /// Path of the plugin binary
    pub path: PathBuf,

    /// Persisted plugin configuration, as JSON
    #[serde(default)]
    pub configuration: Option<String>,

    /// Start the instance once it is loaded
    #[serde(default = "default_true")]
    pub autostart: bool,
}

fn default_max_running_instances() -> usize {
    16
}

fn default_max_attempts() -> u32 {
    500
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_stop_warning_after() -> Duration {
    Duration::from_secs(30)
}

fn default_event_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();

        assert_eq!(config.max_running_instances, 16);
        assert_eq!(config.unload.max_attempts, 500);
        assert_eq!(config.unload.poll_interval, Duration::from_millis(10));
        assert!(!config.shadow_copy.enabled);
        assert_eq!(config.stop_warning_after, Duration::from_secs(30));
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: HostConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, HostConfig::default());
    }

    #[test]
    fn test_instance_autostart_defaults_to_true() {
        let instance: InstanceConfig =
            serde_json::from_str(r#"{"id": 1, "name": "sensor", "path": "/tmp/sensor.so"}"#)
                .unwrap();

        assert!(instance.autostart);
        assert!(instance.configuration.is_none());
    }
}

//! Configuration validation

use crate::error::{ConfigError, Result};
use crate::HostConfig;
use std::collections::HashSet;

/// Validate configuration
pub fn validate_config(config: &HostConfig) -> Result<()> {
    validate_host(config)?;
    validate_unload(config)?;
    validate_shadow_copy(config)?;
    validate_logging(config)?;
    validate_instances(config)?;

    Ok(())
}

fn validate_host(config: &HostConfig) -> Result<()> {
    if config.max_running_instances == 0 {
        return Err(ConfigError::invalid("max_running_instances must be > 0"));
    }

    if config.event_capacity == 0 {
        return Err(ConfigError::invalid("event_capacity must be > 0"));
    }

    if config.stop_warning_after.is_zero() {
        return Err(ConfigError::invalid("stop_warning_after must be > 0"));
    }

    Ok(())
}

fn validate_unload(config: &HostConfig) -> Result<()> {
    if config.unload.max_attempts == 0 {
        return Err(ConfigError::invalid("unload.max_attempts must be > 0"));
    }

    if config.unload.poll_interval.is_zero() {
        return Err(ConfigError::invalid("unload.poll_interval must be > 0"));
    }

    let budget = config.unload.poll_interval * config.unload.max_attempts;
    if budget.as_secs() > 60 {
        tracing::warn!(
            budget = ?budget,
            "Unload verification may wait more than a minute per binary"
        );
    }

    Ok(())
}

fn validate_shadow_copy(config: &HostConfig) -> Result<()> {
    if !config.shadow_copy.enabled {
        return Ok(());
    }

    match &config.shadow_copy.directory {
        None => Err(ConfigError::invalid(
            "shadow_copy.directory is required when shadow copies are enabled",
        )),
        Some(dir) if dir.as_os_str().is_empty() => {
            Err(ConfigError::invalid("shadow_copy.directory cannot be empty"))
        }
        Some(_) => Ok(()),
    }
}

fn validate_logging(config: &HostConfig) -> Result<()> {
    match config.logging.level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => {
            return Err(ConfigError::invalid(format!("Invalid log level: {other}")));
        }
    }

    match config.logging.format.as_str() {
        "text" | "json" => Ok(()),
        other => Err(ConfigError::invalid(format!(
            "Invalid log format: {other} (must be text or json)"
        ))),
    }
}

fn validate_instances(config: &HostConfig) -> Result<()> {
    let mut ids = HashSet::new();
    let mut names = HashSet::new();

    for instance in &config.instances {
        if instance.id <= 0 {
            return Err(ConfigError::invalid(format!(
                "instance id must be > 0, got {}",
                instance.id
            )));
        }

        if instance.name.trim().is_empty() {
            return Err(ConfigError::invalid("instance name cannot be empty"));
        }

        if instance.path.as_os_str().is_empty() {
            return Err(ConfigError::invalid(format!(
                "instance '{}' has an empty path",
                instance.name
            )));
        }

        if !ids.insert(instance.id) {
            return Err(ConfigError::invalid(format!(
                "duplicate instance id: {}",
                instance.id
            )));
        }

        if !names.insert(instance.name.as_str()) {
            return Err(ConfigError::invalid(format!(
                "duplicate instance name: {}",
                instance.name
            )));
        }
    }

    let autostarted = config.instances.iter().filter(|i| i.autostart).count();
    if autostarted > config.max_running_instances {
        tracing::warn!(
            autostarted,
            limit = config.max_running_instances,
            "More instances are set to autostart than may run at once"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn instance(id: i64, name: &str) -> InstanceConfig {
        InstanceConfig {
            id,
            name: name.to_string(),
            path: PathBuf::from("/opt/plugins/libsensor.so"),
            configuration: None,
            autostart: true,
        }
    }

    #[test]
    fn test_valid_default_config() {
        assert!(validate_config(&HostConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_ceiling() {
        let mut config = HostConfig::default();
        config.max_running_instances = 0;

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_unload_settings() {
        let mut config = HostConfig::default();
        config.unload.max_attempts = 0;
        assert!(validate_config(&config).is_err());

        let mut config = HostConfig::default();
        config.unload.poll_interval = Duration::ZERO;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_shadow_copy_requires_directory() {
        let mut config = HostConfig::default();
        config.shadow_copy.enabled = true;
        assert!(validate_config(&config).is_err());

        config.shadow_copy.directory = Some(PathBuf::from("/tmp/plughost"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = HostConfig::default();
        config.logging.format = "xml".to_string();

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_duplicate_instances() {
        let mut config = HostConfig::default();
        config.instances = vec![instance(1, "sensor"), instance(1, "other")];
        assert!(validate_config(&config).is_err());

        config.instances = vec![instance(1, "sensor"), instance(2, "sensor")];
        assert!(validate_config(&config).is_err());

        config.instances = vec![instance(1, "sensor"), instance(2, "other")];
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_instance_id() {
        let mut config = HostConfig::default();
        config.instances = vec![instance(0, "sensor")];

        assert!(validate_config(&config).is_err());
    }
}

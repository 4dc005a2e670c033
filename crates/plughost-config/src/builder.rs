//! Configuration builder

use crate::error::Result;
use crate::types::{HostConfig, InstanceConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Builder for constructing configuration programmatically
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: HostConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the running instance ceiling
    pub fn max_running_instances(mut self, limit: usize) -> Self {
        self.config.max_running_instances = limit;
        self
    }

    /// Set the unload verification budget
    pub fn unload(mut self, max_attempts: u32, poll_interval: Duration) -> Self {
        self.config.unload.max_attempts = max_attempts;
        self.config.unload.poll_interval = poll_interval;
        self
    }

    /// Enable shadow copies into `directory`
    pub fn shadow_copy(mut self, directory: impl Into<PathBuf>) -> Self {
        self.config.shadow_copy.enabled = true;
        self.config.shadow_copy.directory = Some(directory.into());
        self
    }

    /// Set the stop warning delay
    pub fn stop_warning_after(mut self, after: Duration) -> Self {
        self.config.stop_warning_after = after;
        self
    }

    /// Set the state change channel capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Declare an instance
    pub fn instance(mut self, instance: InstanceConfig) -> Self {
        self.config.instances.push(instance);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<HostConfig> {
        crate::validator::validate_config(&self.config)?;
        Ok(self.config)
    }
}

//! # Sensor Heartbeat Plugin
//!
//! Emits a heartbeat for a sensor at a fixed interval until the host stops
//! the instance, or until a configured number of beats has been sent.
//!
//! Built as a `cdylib`, the library exports its module through
//! [`plughost_api::export_plugin_module!`] and can be loaded by the host:
//!
//! ```text
//! plughost inspect target/release/libsensor_heartbeat.so
//! ```
//!
//! ## Configuration
//!
//! ```json
//! { "interval": "1s", "sensor": "boiler-room", "max_beats": 0, "fail_after": 0 }
//! ```
//!
//! `max_beats` of zero means no limit. A non-zero `fail_after` makes the
//! plugin report a lost sensor once that many heartbeats were sent.

use plughost_api::prelude::*;
use std::sync::Arc;
use std::time::Duration;

plughost_api::configuration! {
    /// Heartbeat settings
    #[derive(Debug, Clone, PartialEq)]
    pub struct HeartbeatConfig {
        /// Delay between two heartbeats
        pub interval: Duration,
        /// Sensor the heartbeat is reported for
        pub sensor: String,
        /// Stop after this many heartbeats; zero for no limit
        pub max_beats: u64,
        /// Fail after this many heartbeats; zero to never fail
        pub fail_after: u64,
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            sensor: "sensor".to_string(),
            max_beats: 0,
            fail_after: 0,
        }
    }
}

/// Heartbeat plugin
#[derive(Debug)]
pub struct HeartbeatPlugin {
    logger: Logger,
    config: HeartbeatConfig,
    beats: u64,
}

impl HeartbeatPlugin {
    /// Constructor called by the host
    pub fn construct(mut args: ConstructorArguments) -> Result<Box<dyn Plugin>, PluginError> {
        let logger = args.logger()?;
        let config: HeartbeatConfig = args.optional_configuration()?.unwrap_or_default();

        if config.interval.is_zero() {
            return Err(PluginError::config("interval must be greater than zero"));
        }

        Ok(Box::new(Self {
            logger,
            config,
            beats: 0,
        }))
    }

    /// Heartbeats sent so far
    pub fn beats(&self) -> u64 {
        self.beats
    }

    fn exhausted(&self) -> bool {
        self.config.max_beats > 0 && self.beats >= self.config.max_beats
    }
}

#[async_trait]
impl Plugin for HeartbeatPlugin {
    async fn execute(&mut self, context: Arc<dyn ExecutionContext>) -> Result<(), PluginError> {
        self.logger.info(format_args!(
            "heartbeat for {} every {:?} on instance {}",
            self.config.sensor,
            self.config.interval,
            context.instance_name()
        ));

        while !self.exhausted() && context.delay(self.config.interval).await {
            self.beats += 1;
            self.logger
                .debug(format_args!("{} alive ({})", self.config.sensor, self.beats));

            if self.config.fail_after > 0 && self.beats >= self.config.fail_after {
                return Err(PluginError::runtime(format!(
                    "{} lost contact after {} heartbeats",
                    self.config.sensor, self.beats
                )));
            }
        }

        self.logger.info(format_args!(
            "{} sent {} heartbeats",
            self.config.sensor, self.beats
        ));
        Ok(())
    }
}

/// Module table of this library
pub fn module() -> PluginModule {
    PluginModule::new("sensor-heartbeat", env!("CARGO_PKG_VERSION")).with_type(
        TypeDescriptor::plugin::<HeartbeatPlugin>().with_constructor(
            ConstructorDescriptor::new(HeartbeatPlugin::construct)
                .logger_for::<HeartbeatPlugin>("logger")
                .configuration::<HeartbeatConfig>("config"),
        ),
    )
}

plughost_api::export_plugin_module!(module);

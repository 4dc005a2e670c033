//! Mock plugins and log sinks for testing

use crate::descriptor::ConstructorArguments;
use crate::error::{PluginError, Result};
use crate::logger::{LogLevel, LogSink, Logger};
use crate::plugin::{ExecutionContext, Plugin};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

crate::configuration! {
    /// Configuration of [`CooperativePlugin`]
    #[derive(Debug, Clone, PartialEq)]
    pub struct TickConfig {
        /// Delay between two ticks
        pub interval: Duration,
        /// Text written on every tick
        pub label: String,
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10),
            label: "tick".to_string(),
        }
    }
}

crate::configuration! {
    /// Configuration holding one field of every supported kind
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct SampleConfig {
        /// `bool`
        pub flag: bool,
        /// `i8`
        pub tiny: i8,
        /// `i16`
        pub small: i16,
        /// `i32`
        pub medium: i32,
        /// `i64`
        pub large: i64,
        /// `u8`
        pub octet: u8,
        /// `u16`
        pub port: u16,
        /// `u32`
        pub count: u32,
        /// `u64`
        pub total: u64,
        /// `f32`
        pub ratio: f32,
        /// `f64`
        pub precise: f64,
        /// Decimal
        pub amount: Decimal,
        /// `String`
        pub label: String,
        /// `char`
        pub grade: char,
        /// Timestamp
        pub since: DateTime<Utc>,
        /// Duration
        pub timeout: Duration,
        /// UUID
        pub token: Uuid,
    }
}

impl SampleConfig {
    /// A value with every field set to something other than its default
    pub fn populated() -> Self {
        Self {
            flag: true,
            tiny: -8,
            small: -1600,
            medium: 5,
            large: -9_000_000_000,
            octet: 200,
            port: 8080,
            count: 4_000_000_000,
            total: 18_000_000_000_000_000_000,
            ratio: 0.5,
            precise: 3.25,
            amount: Decimal::new(12345, 2),
            label: "x".to_string(),
            grade: 'A',
            since: DateTime::parse_from_rfc3339("2024-03-01T12:30:00Z")
                .map(|at| at.with_timezone(&Utc))
                .unwrap_or_default(),
            timeout: Duration::from_secs(90),
            token: Uuid::from_u128(0x6f1c_2a4b_0000_4000_8000_0000_0000_0001),
        }
    }
}

/// Plugin that ticks until it is cancelled
#[derive(Debug)]
pub struct CooperativePlugin {
    logger: Logger,
    config: TickConfig,
}

impl CooperativePlugin {
    /// Constructor taking a logger and a [`TickConfig`]
    pub fn construct(mut args: ConstructorArguments) -> Result<Box<dyn Plugin>> {
        Ok(Box::new(Self {
            logger: args.logger()?,
            config: args.optional_configuration()?.unwrap_or_default(),
        }))
    }
}

#[async_trait]
impl Plugin for CooperativePlugin {
    async fn execute(&mut self, context: Arc<dyn ExecutionContext>) -> Result<()> {
        let mut ticks = 0u64;
        while context.delay(self.config.interval).await {
            ticks += 1;
            self.logger
                .debug(format_args!("{} {}", self.config.label, ticks));
        }
        self.logger.info(format_args!("stopped after {ticks} ticks"));
        Ok(())
    }
}

/// Plugin that returns as soon as it runs
#[derive(Debug, Default)]
pub struct ImmediatePlugin;

impl ImmediatePlugin {
    /// Parameterless constructor
    pub fn construct(_args: ConstructorArguments) -> Result<Box<dyn Plugin>> {
        Ok(Box::new(Self))
    }
}

#[async_trait]
impl Plugin for ImmediatePlugin {
    async fn execute(&mut self, _context: Arc<dyn ExecutionContext>) -> Result<()> {
        Ok(())
    }
}

/// Plugin whose execution returns an error
#[derive(Debug, Default)]
pub struct FailingPlugin;

impl FailingPlugin {
    /// Parameterless constructor
    pub fn construct(_args: ConstructorArguments) -> Result<Box<dyn Plugin>> {
        Ok(Box::new(Self))
    }
}

#[async_trait]
impl Plugin for FailingPlugin {
    async fn execute(&mut self, _context: Arc<dyn ExecutionContext>) -> Result<()> {
        Err(PluginError::runtime("sensor offline"))
    }
}

/// Plugin whose execution panics
#[derive(Debug, Default)]
pub struct PanickingPlugin;

impl PanickingPlugin {
    /// Parameterless constructor
    pub fn construct(_args: ConstructorArguments) -> Result<Box<dyn Plugin>> {
        Ok(Box::new(Self))
    }
}

#[async_trait]
impl Plugin for PanickingPlugin {
    async fn execute(&mut self, _context: Arc<dyn ExecutionContext>) -> Result<()> {
        panic!("plugin lost its mind");
    }
}

/// Plugin whose constructor always fails
#[derive(Debug, Default)]
pub struct BrokenConstructorPlugin;

impl BrokenConstructorPlugin {
    /// Constructor returning an error
    pub fn construct(_args: ConstructorArguments) -> Result<Box<dyn Plugin>> {
        Err(PluginError::init("missing calibration data"))
    }

    /// Constructor that panics
    pub fn construct_panicking(_args: ConstructorArguments) -> Result<Box<dyn Plugin>> {
        panic!("constructor blew up");
    }
}

#[async_trait]
impl Plugin for BrokenConstructorPlugin {
    async fn execute(&mut self, _context: Arc<dyn ExecutionContext>) -> Result<()> {
        Ok(())
    }
}

/// Plugin requiring its configuration
#[derive(Debug)]
pub struct ConfiguredPlugin {
    config: SampleConfig,
}

impl ConfiguredPlugin {
    /// Constructor requiring a [`SampleConfig`]
    pub fn construct(mut args: ConstructorArguments) -> Result<Box<dyn Plugin>> {
        Ok(Box::new(Self {
            config: args.configuration()?,
        }))
    }

    /// Configuration the plugin was built with
    pub fn config(&self) -> &SampleConfig {
        &self.config
    }
}

#[async_trait]
impl Plugin for ConfiguredPlugin {
    async fn execute(&mut self, _context: Arc<dyn ExecutionContext>) -> Result<()> {
        if self.config.label.is_empty() {
            return Err(PluginError::config("label must not be empty"));
        }
        Ok(())
    }
}

/// A log record captured by [`RecordingLogSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Logger category
    pub category: String,
    /// Severity
    pub level: LogLevel,
    /// Message
    pub message: String,
}

/// Log sink that keeps every record in memory
#[derive(Debug, Default)]
pub struct RecordingLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl RecordingLogSink {
    /// Create an empty sink
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records written so far
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl LogSink for RecordingLogSink {
    fn log(&self, category: &str, level: LogLevel, message: &str) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(LogRecord {
                category: category.to_string(),
                level,
                message: message.to_string(),
            });
    }
}

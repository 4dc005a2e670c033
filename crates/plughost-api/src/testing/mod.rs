//! Testing utilities for plugin and host developers
//!
//! This module provides mock plugins, ready-made type descriptors and a
//! module builder to make testing hosts and plugins easier.

pub mod builders;
pub mod mocks;

pub use builders::{fixtures, ModuleBuilder};
pub use mocks::{
    BrokenConstructorPlugin, ConfiguredPlugin, CooperativePlugin, FailingPlugin, ImmediatePlugin,
    LogRecord, PanickingPlugin, RecordingLogSink, SampleConfig, TickConfig,
};

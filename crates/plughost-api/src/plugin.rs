//! Core plugin trait and execution context

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Core plugin trait that every hosted plugin type must implement
///
/// A plugin is constructed by the host through the constructor declared in
/// its [`TypeDescriptor`](crate::TypeDescriptor) and then executed exactly
/// once on its own task.
#[async_trait]
pub trait Plugin: Send + fmt::Debug {
    /// Run the plugin until it finishes or the context is cancelled.
    ///
    /// Cancellation is cooperative: the host never aborts this future. A
    /// plugin that ignores [`ExecutionContext::is_cancelled`] keeps its
    /// instance active indefinitely.
    async fn execute(&mut self, context: Arc<dyn ExecutionContext>) -> Result<()>;
}

/// Services the host hands to a running plugin
///
/// Everything time- or cancellation-related goes through this trait so that
/// plugin code runs on the host's scheduler instead of its own copy of the
/// async runtime.
#[async_trait]
pub trait ExecutionContext: Send + Sync + fmt::Debug {
    /// Identifier of the instance being executed
    fn instance_id(&self) -> i64;

    /// Display name of the instance being executed
    fn instance_name(&self) -> &str;

    /// Whether the host has requested cancellation
    fn is_cancelled(&self) -> bool;

    /// Resolves once cancellation has been requested
    async fn cancelled(&self);

    /// Sleep for `duration`
    ///
    /// Returns `false` when cancellation interrupted the delay.
    async fn delay(&self, duration: Duration) -> bool;
}

//! Execution context handed to running plugins

use async_trait::async_trait;
use plughost_api::ExecutionContext;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// [`ExecutionContext`] backed by the host's Tokio runtime
#[derive(Debug, Clone)]
pub struct TaskContext {
    id: i64,
    name: String,
    token: CancellationToken,
}

impl TaskContext {
    /// Create a context for instance `id`, cancelled through `token`
    pub fn new(id: i64, name: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            id,
            name: name.into(),
            token,
        }
    }
}

#[async_trait]
impl ExecutionContext for TaskContext {
    fn instance_id(&self) -> i64 {
        self.id
    }

    fn instance_name(&self) -> &str {
        &self.name
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    async fn delay(&self, duration: Duration) -> bool {
        if self.token.is_cancelled() {
            return false;
        }

        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

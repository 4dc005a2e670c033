//! State change notifications

use crate::instance::InstanceState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// One state transition of one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// Instance id
    pub id: i64,
    /// State before the transition
    pub old: InstanceState,
    /// State after the transition
    pub new: InstanceState,
    /// When the transition happened
    pub at: DateTime<Utc>,
}

/// Fan-out of state changes to any number of observers
///
/// Publishing never blocks: a slow observer lags and loses the oldest
/// notifications instead of stalling the state machine.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StateChange>,
}

impl EventBus {
    /// Create a bus buffering `capacity` notifications per observer
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new observer
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.sender.subscribe()
    }

    /// Publish a change
    pub fn publish(&self, change: StateChange) {
        if self.sender.send(change).is_err() {
            trace!(instance_id = change.id, "No observers for state change");
        }
    }

    /// Number of registered observers
    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

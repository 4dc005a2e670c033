//! Instance state machine and snapshots

use crate::error::HostError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Lifecycle state of an instance
///
/// States only ever move forward:
///
/// ```text
/// None -> PlugInLoading -> PlugInLoaded | PlugInLoadFailure
///      -> Activating -> Active -> Complete | Faulted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceState {
    /// Registered, loading not started yet
    None,
    /// Binary is being loaded and validated
    PlugInLoading,
    /// Plugin constructed and ready to start
    PlugInLoaded,
    /// Loading, validation or construction failed
    PlugInLoadFailure,
    /// Execution is being launched
    Activating,
    /// Plugin is executing
    Active,
    /// Execution finished
    Complete,
    /// Execution failed
    Faulted,
}

impl InstanceState {
    /// Position in the lifecycle; alternatives share a rank
    pub fn rank(self) -> u8 {
        match self {
            Self::None => 0,
            Self::PlugInLoading => 1,
            Self::PlugInLoaded | Self::PlugInLoadFailure => 2,
            Self::Activating => 3,
            Self::Active => 4,
            Self::Complete | Self::Faulted => 5,
        }
    }

    /// No transition leaves this state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Faulted | Self::PlugInLoadFailure)
    }

    /// Counted against the running instance ceiling
    pub fn is_running(self) -> bool {
        matches!(self, Self::Activating | Self::Active)
    }

    /// Load pipeline has not finished yet
    pub fn is_pending(self) -> bool {
        matches!(self, Self::None | Self::PlugInLoading)
    }

    /// Whether moving to `next` keeps the lifecycle monotonic
    pub fn can_transition_to(self, next: InstanceState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Snapshot of an instance
#[derive(Debug, Clone)]
pub struct Instance {
    /// Caller assigned id
    pub id: i64,
    /// Unique display name
    pub name: String,
    /// Binary path
    pub path: PathBuf,
    /// State at the time of the snapshot
    pub state: InstanceState,
    /// Why the instance failed, if it did
    pub fault: Option<Arc<HostError>>,
    /// Version declared by the binary, once loaded
    pub version: Option<String>,
    /// Plugin type name, once resolved
    pub type_name: Option<String>,
    /// Registration time
    pub created_at: DateTime<Utc>,
    /// Execution start time
    pub started_at: Option<DateTime<Utc>>,
    /// Execution end time
    pub finished_at: Option<DateTime<Utc>>,
}

impl Instance {
    /// Fault rendered as text
    pub fn fault_message(&self) -> Option<String> {
        self.fault.as_ref().map(|fault| fault.to_string())
    }
}

/// Parameters of a new instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRequest {
    /// Instance id, > 0
    pub id: i64,
    /// Unique display name
    pub name: String,
    /// Binary path
    pub path: PathBuf,
    /// Persisted plugin configuration, as JSON
    pub configuration: Option<String>,
}

impl InstanceRequest {
    /// Create a request without configuration
    pub fn new(id: i64, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            name: name.into(),
            path: path.into(),
            configuration: None,
        }
    }

    /// Attach a persisted configuration
    pub fn with_configuration(mut self, json: impl Into<String>) -> Self {
        self.configuration = Some(json.into());
        self
    }
}

/// Filter and paging for instance listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceQuery {
    /// Only instances in this state
    pub state: Option<InstanceState>,
    /// Only instances whose name contains this text, ignoring case
    pub name_contains: Option<String>,
    /// Instances to skip
    pub offset: usize,
    /// Maximum number of instances
    pub limit: Option<usize>,
}

impl InstanceQuery {
    /// Match every instance
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter by state
    pub fn state(mut self, state: InstanceState) -> Self {
        self.state = Some(state);
        self
    }

    /// Filter by name
    pub fn name_contains(mut self, text: impl Into<String>) -> Self {
        self.name_contains = Some(text.into());
        self
    }

    /// Select one page
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Whether `instance` passes the filters
    pub fn matches(&self, instance: &Instance) -> bool {
        if self.state.is_some_and(|state| state != instance.state) {
            return false;
        }

        match &self.name_contains {
            Some(text) => instance
                .name
                .to_lowercase()
                .contains(&text.to_lowercase()),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: [InstanceState; 6] = [
        InstanceState::None,
        InstanceState::PlugInLoading,
        InstanceState::PlugInLoaded,
        InstanceState::Activating,
        InstanceState::Active,
        InstanceState::Complete,
    ];

    #[test]
    fn test_forward_transitions() {
        for window in ORDER.windows(2) {
            assert!(window[0].can_transition_to(window[1]));
            assert!(!window[1].can_transition_to(window[0]));
        }
        assert!(InstanceState::PlugInLoading.can_transition_to(InstanceState::PlugInLoadFailure));
        assert!(InstanceState::Active.can_transition_to(InstanceState::Faulted));
        assert!(InstanceState::PlugInLoaded.can_transition_to(InstanceState::Complete));
    }

    #[test]
    fn test_no_revisit_or_sibling_moves() {
        assert!(!InstanceState::Active.can_transition_to(InstanceState::Active));
        assert!(!InstanceState::PlugInLoaded.can_transition_to(InstanceState::PlugInLoadFailure));
    }

    #[test]
    fn test_terminal_states() {
        for state in [
            InstanceState::Complete,
            InstanceState::Faulted,
            InstanceState::PlugInLoadFailure,
        ] {
            assert!(state.is_terminal());
            assert!(!state.can_transition_to(InstanceState::Faulted));
            assert!(!state.can_transition_to(InstanceState::Activating));
        }
    }

    #[test]
    fn test_running_states() {
        assert!(InstanceState::Activating.is_running());
        assert!(InstanceState::Active.is_running());
        assert!(!InstanceState::PlugInLoaded.is_running());
        assert!(!InstanceState::Complete.is_running());
    }

    #[test]
    fn test_query_matches() {
        let instance = Instance {
            id: 1,
            name: "North Sensor".to_string(),
            path: PathBuf::from("/opt/sensor.so"),
            state: InstanceState::Active,
            fault: None,
            version: None,
            type_name: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        assert!(InstanceQuery::all().matches(&instance));
        assert!(InstanceQuery::all().name_contains("north").matches(&instance));
        assert!(!InstanceQuery::all().name_contains("south").matches(&instance));
        assert!(InstanceQuery::all().state(InstanceState::Active).matches(&instance));
        assert!(!InstanceQuery::all().state(InstanceState::Complete).matches(&instance));
    }
}

//! Unload verification
//!
//! Releasing a [`LoadContext`] only drops one reference to the binary. Other
//! holders, such as a finishing execution task, may still keep it mapped.
//! The verifier watches a weak reference until the binary is gone, and only
//! then may files backing it be deleted or replaced.

use crate::load_context::LoadContext;
use crate::loader::LoadedBinary;
use plughost_config::UnloadConfig;
use std::path::{Path, PathBuf};
use std::sync::Weak;
use std::time::Duration;
use tracing::{debug, warn};

/// Non-owning observer of a loaded binary
#[derive(Debug, Clone)]
pub struct UnloadHandle {
    context: String,
    binary: Weak<LoadedBinary>,
    shadow_path: Option<PathBuf>,
}

impl UnloadHandle {
    /// Name of the tracked context
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Whether the binary has been reclaimed
    pub fn is_unloaded(&self) -> bool {
        self.binary.strong_count() == 0
    }

    /// Shadow copy to delete once the binary is reclaimed
    pub fn shadow_path(&self) -> Option<&Path> {
        self.shadow_path.as_deref()
    }
}

/// Bounded poll loop confirming that binaries are reclaimed
#[derive(Debug, Clone, Copy)]
pub struct UnloadVerifier {
    max_attempts: u32,
    poll_interval: Duration,
}

impl Default for UnloadVerifier {
    fn default() -> Self {
        Self::from_config(&UnloadConfig::default())
    }
}

impl UnloadVerifier {
    /// Create a verifier polling up to `max_attempts` times
    pub fn new(max_attempts: u32, poll_interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            poll_interval,
        }
    }

    /// Create a verifier from host configuration
    pub fn from_config(config: &UnloadConfig) -> Self {
        Self::new(config.max_attempts, config.poll_interval)
    }

    /// Start tracking the binary of `context`
    ///
    /// Valid before or after [`LoadContext::unload`].
    pub fn track(&self, context: &LoadContext) -> UnloadHandle {
        UnloadHandle {
            context: context.name().to_string(),
            binary: context.tracker(),
            shadow_path: context.shadow_path().map(Path::to_path_buf),
        }
    }

    /// Wait until the tracked binary is reclaimed
    ///
    /// Returns `false` when the attempts are exhausted. That is not an error:
    /// the binary leaks, the host carries on.
    pub async fn await_unload(&self, handle: &UnloadHandle) -> bool {
        for attempt in 0..self.max_attempts {
            if handle.is_unloaded() {
                debug!(context = %handle.context, attempts = attempt, "Unload confirmed");
                return true;
            }

            // Let tasks still holding the binary run to completion.
            tokio::task::yield_now().await;
            tokio::time::sleep(self.poll_interval).await;
        }

        if handle.is_unloaded() {
            debug!(context = %handle.context, attempts = self.max_attempts, "Unload confirmed");
            return true;
        }

        warn!(
            context = %handle.context,
            attempts = self.max_attempts,
            remaining_references = handle.binary.strong_count(),
            "Binary still referenced after unload; leaving it loaded"
        );
        false
    }

    /// Wait for reclamation, then delete the shadow copy
    ///
    /// The copy is kept when reclamation cannot be confirmed.
    pub async fn retire(&self, handle: &UnloadHandle) -> bool {
        let unloaded = self.await_unload(handle).await;

        if let Some(copy) = handle.shadow_path() {
            if unloaded {
                match tokio::fs::remove_file(copy).await {
                    Ok(()) => debug!(path = %copy.display(), "Shadow copy removed"),
                    Err(e) => {
                        warn!(path = %copy.display(), error = %e, "Failed to remove shadow copy")
                    }
                }
            } else {
                warn!(path = %copy.display(), "Keeping shadow copy of unreclaimed binary");
            }
        }

        unloaded
    }
}

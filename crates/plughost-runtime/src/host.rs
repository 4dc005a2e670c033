//! Instance host
//!
//! The host owns the registry of plugin instances and drives each one
//! through its lifecycle:
//!
//! ```text
//! None -> PlugInLoading -> PlugInLoaded -----> Activating -> Active -> Complete
//!                      \-> PlugInLoadFailure                       \-> Faulted
//! ```
//!
//! Loading runs in the background right after [`InstanceHost::create_instance`]
//! returns. States only move forward; observers subscribe through
//! [`InstanceHost::subscribe`].

use crate::error::{HostError, Result};
use crate::events::{EventBus, StateChange};
use crate::factory::{LoggerFactory, PluginFactory, TracingLoggerFactory};
use crate::instance::{Instance, InstanceQuery, InstanceRequest, InstanceState};
use crate::loader::{BinaryLoader, NativeLoader};
use crate::pipeline::{self, InstanceEntry};
use crate::unload::UnloadVerifier;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use plughost_config::{validate_config, HostConfig, InstanceConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// State shared by the host and its background tasks
#[derive(Debug)]
pub(crate) struct HostShared {
    pub(crate) config: HostConfig,
    pub(crate) loader: Arc<dyn BinaryLoader>,
    pub(crate) factory: PluginFactory,
    pub(crate) verifier: UnloadVerifier,
    pub(crate) events: EventBus,
    pub(crate) runtime: Handle,
    registry: DashMap<i64, Arc<InstanceEntry>>,
    create_lock: Mutex<()>,
    path_locks: DashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>,
}

impl HostShared {
    /// Directory for shadow copies, when enabled
    pub(crate) fn shadow_directory(&self) -> Option<PathBuf> {
        let shadow = &self.config.shadow_copy;
        if shadow.enabled {
            shadow.directory.clone()
        } else {
            None
        }
    }

    /// Lock serializing loads of the same file, with the key it is kept under
    ///
    /// Hand the lock back through [`release_path_lock`](Self::release_path_lock)
    /// once the load is done.
    pub(crate) async fn path_lock(&self, path: &Path) -> (PathBuf, Arc<tokio::sync::Mutex<()>>) {
        let key = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf());
        let lock = self.path_locks.entry(key.clone()).or_default().value().clone();
        (key, lock)
    }

    /// Drop the lock of a file when no other load holds or awaits it
    pub(crate) fn release_path_lock(&self, key: &Path, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        // Clones are only made under the shard lock held here, so a count of
        // one means the map owns the last reference.
        self.path_locks
            .remove_if(key, |_, held| Arc::strong_count(held) == 1);
    }
}

/// Instance counts per lifecycle phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HostStats {
    /// Registered instances
    pub total: usize,
    /// Not yet loaded
    pub pending: usize,
    /// Loaded, never started
    pub loaded: usize,
    /// Failed to load
    pub load_failed: usize,
    /// Activating or active
    pub running: usize,
    /// Completed
    pub complete: usize,
    /// Faulted
    pub faulted: usize,
    /// Running instance ceiling
    pub max_running: usize,
}

/// Host of plugin instances
///
/// Cheap to clone; clones share the same registry.
#[derive(Debug, Clone)]
pub struct InstanceHost {
    shared: Arc<HostShared>,
}

impl InstanceHost {
    /// Create a host with native loading and tracing loggers
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: HostConfig) -> Result<Self> {
        HostBuilder::new().config(config).build()
    }

    /// Start building a host
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    /// Host configuration
    pub fn config(&self) -> &HostConfig {
        &self.shared.config
    }

    /// Register a new instance and start loading it
    ///
    /// Returns as soon as the instance is registered, in state `None`.
    pub fn create_instance(
        &self,
        id: i64,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Instance> {
        self.create_instance_with(InstanceRequest::new(id, name, path))
    }

    /// Register a new instance with an optional persisted configuration
    pub fn create_instance_with(&self, request: InstanceRequest) -> Result<Instance> {
        if request.id <= 0 {
            return Err(HostError::InvalidId(request.id));
        }
        if request.name.trim().is_empty() {
            return Err(HostError::InvalidName);
        }
        if request.path.as_os_str().is_empty() {
            return Err(HostError::InvalidPath);
        }

        let entry = {
            let _guard = self.shared.create_lock.lock();
            let entries = self.entries();

            if self.shared.registry.contains_key(&request.id) {
                return Err(HostError::InstanceExists(request.id));
            }
            if entries.iter().any(|entry| entry.name == request.name) {
                return Err(HostError::InstanceNameExists(request.name));
            }

            let limit = self.shared.config.max_running_instances;
            if self.running_count() >= limit {
                return Err(HostError::MaxInstancesRunning(limit));
            }

            let entry = Arc::new(InstanceEntry::new(request));
            self.shared.registry.insert(entry.id, entry.clone());
            entry
        };

        info!(
            instance_id = entry.id,
            name = %entry.name,
            path = %entry.path.display(),
            "Instance created"
        );

        let snapshot = entry.snapshot();
        self.shared
            .runtime
            .spawn(pipeline::load_instance(self.shared.clone(), entry));

        Ok(snapshot)
    }

    /// Register an instance described in host configuration
    pub fn create_from_config(&self, instance: &InstanceConfig) -> Result<Instance> {
        let mut request = InstanceRequest::new(instance.id, &instance.name, &instance.path);
        request.configuration = instance.configuration.clone();
        self.create_instance_with(request)
    }

    /// Start executing a loaded instance
    ///
    /// Waits for a pending load to finish. Starting an activating or active
    /// instance is a no-op. The running ceiling applies here as well as in
    /// [`create_instance`](Self::create_instance): several loaded instances
    /// may be waiting, but only `max_running_instances` of them run at once.
    pub async fn start_instance(&self, id: i64) -> Result<Instance> {
        let entry = self.entry(id)?;
        Self::wait_for_load(&entry).await?;

        let mut inner = entry.lock();
        if inner.removed {
            return Err(HostError::InstanceNotFound(id));
        }

        match inner.state {
            state if state.is_running() => {
                debug!(instance_id = id, state = %state, "Instance already running");
                Ok(entry.snapshot_locked(&inner))
            }
            InstanceState::PlugInLoaded => {
                let _guard = self.shared.create_lock.lock();
                let limit = self.shared.config.max_running_instances;
                if self.running_count() >= limit {
                    return Err(HostError::MaxInstancesRunning(limit));
                }

                pipeline::launch(&self.shared, &entry, &mut inner)?;
                info!(instance_id = id, name = %entry.name, "Instance started");
                Ok(entry.snapshot_locked(&inner))
            }
            state => Err(HostError::InstanceNotStartable { id, state }),
        }
    }

    /// Request a cooperative stop
    ///
    /// A loaded instance that never started completes at once. A running
    /// instance completes when its plugin honors the cancellation; one that
    /// does not is reported after the configured grace period.
    pub fn stop_instance(&self, id: i64) -> Result<()> {
        let entry = self.entry(id)?;
        entry.cancel.cancel();

        let mut inner = entry.lock();
        match inner.state {
            InstanceState::PlugInLoaded => {
                inner.finished_at = Some(chrono::Utc::now());
                entry.transition(&mut inner, InstanceState::Complete, &self.shared.events);
                info!(instance_id = id, "Instance stopped before start");
            }
            InstanceState::Activating | InstanceState::Active => {
                info!(instance_id = id, name = %entry.name, "Stop requested");
                pipeline::watch_stop(&self.shared, &entry);
            }
            InstanceState::None | InstanceState::PlugInLoading => {
                debug!(instance_id = id, "Stop requested while loading");
            }
            state => {
                debug!(instance_id = id, state = %state, "Instance already finished");
            }
        }

        Ok(())
    }

    /// Unregister a non-running instance and release its binary
    ///
    /// The binary is retired in the background.
    pub fn remove_instance(&self, id: i64) -> Result<()> {
        let entry = self.entry(id)?;

        let (plugin, context) = {
            let mut inner = entry.lock();
            if inner.removed {
                return Err(HostError::InstanceNotFound(id));
            }
            if inner.state.is_running() {
                return Err(HostError::InstanceRunning(id));
            }
            inner.removed = true;
            (inner.plugin.take(), inner.context.take())
        };

        self.shared.registry.remove(&id);
        entry.cancel.cancel();
        entry.retired.cancel();

        if plugin.is_some() || context.is_some() {
            let verifier = self.shared.verifier;
            self.shared.runtime.spawn(async move {
                pipeline::retire(&verifier, plugin, context).await;
            });
        }

        info!(instance_id = id, name = %entry.name, "Instance removed");
        Ok(())
    }

    /// Whether `id` is registered
    pub fn instance_exists(&self, id: i64) -> bool {
        self.shared.registry.contains_key(&id)
    }

    /// Snapshot of one instance
    pub fn get_instance(&self, id: i64) -> Result<Instance> {
        Ok(self.entry(id)?.snapshot())
    }

    /// Snapshots matching `query`, ordered by id
    pub fn list_instances(&self, query: &InstanceQuery) -> Vec<Instance> {
        let mut instances: Vec<Instance> = self
            .entries()
            .iter()
            .map(|entry| entry.snapshot())
            .filter(|instance| query.matches(instance))
            .collect();
        instances.sort_by_key(|instance| instance.id);

        instances
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Number of registered instances
    pub fn count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Instance counts per lifecycle phase
    pub fn stats(&self) -> HostStats {
        let mut stats = HostStats {
            max_running: self.shared.config.max_running_instances,
            ..HostStats::default()
        };

        for entry in self.entries() {
            stats.total += 1;
            match entry.state() {
                InstanceState::None | InstanceState::PlugInLoading => stats.pending += 1,
                InstanceState::PlugInLoaded => stats.loaded += 1,
                InstanceState::PlugInLoadFailure => stats.load_failed += 1,
                InstanceState::Activating | InstanceState::Active => stats.running += 1,
                InstanceState::Complete => stats.complete += 1,
                InstanceState::Faulted => stats.faulted += 1,
            }
        }

        stats
    }

    /// Observe state changes of every instance
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.shared.events.subscribe()
    }

    /// Wait until instance `id` reaches `target`
    ///
    /// Fails with [`HostError::UnexpectedState`] once `target` can no longer
    /// be reached, and with [`HostError::Timeout`] after `timeout`.
    pub async fn wait_for_state(
        &self,
        id: i64,
        target: InstanceState,
        timeout: Duration,
    ) -> Result<Instance> {
        let entry = self.entry(id)?;
        let mut states = entry.subscribe_state();

        let reached = tokio::time::timeout(timeout, async {
            loop {
                let state = *states.borrow_and_update();
                if state == target {
                    return Ok(());
                }
                if state.is_terminal() || state.rank() >= target.rank() {
                    return Err(HostError::UnexpectedState {
                        id,
                        expected: target,
                        actual: state,
                    });
                }

                tokio::select! {
                    changed = states.changed() => {
                        if changed.is_err() {
                            return Err(HostError::InstanceNotFound(id));
                        }
                    }
                    _ = entry.retired.cancelled() => return Err(HostError::InstanceNotFound(id)),
                }
            }
        })
        .await;

        match reached {
            Ok(Ok(())) => Ok(entry.snapshot()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(HostError::Timeout {
                id,
                state: entry.state(),
            }),
        }
    }

    /// Stop every instance and wait up to `timeout` for them to finish
    ///
    /// Returns how many instances are still running afterwards.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        let entries = self.entries();
        info!(instances = entries.len(), "Shutting down instance host");

        for entry in &entries {
            if let Err(e) = self.stop_instance(entry.id) {
                debug!(instance_id = entry.id, error = %e, "Skipping instance during shutdown");
            }
        }

        let waits = entries
            .iter()
            .filter(|entry| entry.state().is_running())
            .map(|entry| pipeline::wait_until_settled(entry));

        if tokio::time::timeout(timeout, join_all(waits)).await.is_err() {
            debug!(?timeout, "Shutdown wait elapsed");
        }

        let still_running = self
            .entries()
            .iter()
            .filter(|entry| entry.state().is_running())
            .count();
        if still_running > 0 {
            warn!(still_running, "Instances ignored cancellation during shutdown");
        } else {
            info!("Instance host shut down");
        }

        still_running
    }

    fn entry(&self, id: i64) -> Result<Arc<InstanceEntry>> {
        self.shared
            .registry
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(HostError::InstanceNotFound(id))
    }

    /// Activating or active instances; callers hold `create_lock`
    fn running_count(&self) -> usize {
        self.shared
            .registry
            .iter()
            .filter(|entry| entry.value().state().is_running())
            .count()
    }

    fn entries(&self) -> Vec<Arc<InstanceEntry>> {
        self.shared
            .registry
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn wait_for_load(entry: &InstanceEntry) -> Result<()> {
        let mut states = entry.subscribe_state();
        loop {
            let state = *states.borrow_and_update();
            if !state.is_pending() {
                return Ok(());
            }

            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        return Err(HostError::InstanceNotFound(entry.id));
                    }
                }
                _ = entry.retired.cancelled() => return Err(HostError::InstanceNotFound(entry.id)),
            }
        }
    }
}

/// Builder for [`InstanceHost`]
#[derive(Debug, Default)]
pub struct HostBuilder {
    config: Option<HostConfig>,
    loader: Option<Arc<dyn BinaryLoader>>,
    logger_factory: Option<Arc<dyn LoggerFactory>>,
    runtime: Option<Handle>,
}

impl HostBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Host configuration
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Binary loader; defaults to [`NativeLoader`]
    pub fn loader(mut self, loader: Arc<dyn BinaryLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Logger factory; defaults to [`TracingLoggerFactory`]
    pub fn logger_factory(mut self, factory: Arc<dyn LoggerFactory>) -> Self {
        self.logger_factory = Some(factory);
        self
    }

    /// Runtime driving background work; defaults to the current one
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the host
    pub fn build(self) -> Result<InstanceHost> {
        let config = self.config.unwrap_or_default();
        validate_config(&config)?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| HostError::NoRuntime)?,
        };
        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(NativeLoader::new()));
        let logger_factory = self
            .logger_factory
            .unwrap_or_else(|| Arc::new(TracingLoggerFactory::new()));

        debug!(
            max_running_instances = config.max_running_instances,
            shadow_copy = config.shadow_copy.enabled,
            "Instance host created"
        );

        Ok(InstanceHost {
            shared: Arc::new(HostShared {
                verifier: UnloadVerifier::from_config(&config.unload),
                events: EventBus::new(config.event_capacity),
                factory: PluginFactory::new(logger_factory),
                loader,
                runtime,
                registry: DashMap::new(),
                create_lock: Mutex::new(()),
                path_locks: DashMap::new(),
                config,
            }),
        })
    }
}

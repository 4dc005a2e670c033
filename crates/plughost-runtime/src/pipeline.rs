//! Per-instance bookkeeping and the background work driving it
//!
//! Every state change of an instance happens under that instance's lock and
//! publishes its notification before the lock is released, so observers see
//! the transitions of one instance in order.

use crate::config_loader::ConfigurationLoader;
use crate::context::TaskContext;
use crate::error::{HostError, Result};
use crate::events::{EventBus, StateChange};
use crate::factory::panic_message;
use crate::host::HostShared;
use crate::instance::{Instance, InstanceRequest, InstanceState};
use crate::load_context::LoadContext;
use crate::loader::LoadedBinary;
use crate::unload::UnloadVerifier;
use crate::validator::{ContractValidator, PluginTypeInfo};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, MutexGuard};
use plughost_api::{ExecutionContext, Plugin};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Registry entry of one instance
#[derive(Debug)]
pub(crate) struct InstanceEntry {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) path: PathBuf,
    pub(crate) configuration: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    /// Cooperative stop signal handed to the plugin
    pub(crate) cancel: CancellationToken,
    /// Fired once the entry leaves the registry
    pub(crate) retired: CancellationToken,
    state_tx: watch::Sender<InstanceState>,
    inner: Mutex<EntryInner>,
}

/// Mutable part of an entry
///
/// `plugin` is declared before `context`: the plugin's code lives in the
/// binary the context keeps loaded.
#[derive(Debug)]
pub(crate) struct EntryInner {
    pub(crate) state: InstanceState,
    pub(crate) fault: Option<Arc<HostError>>,
    pub(crate) info: Option<PluginTypeInfo>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) plugin: Option<Box<dyn Plugin>>,
    pub(crate) task: Option<JoinHandle<()>>,
    pub(crate) context: Option<LoadContext>,
    pub(crate) removed: bool,
}

impl InstanceEntry {
    pub(crate) fn new(request: InstanceRequest) -> Self {
        let (state_tx, _) = watch::channel(InstanceState::None);

        Self {
            id: request.id,
            name: request.name,
            path: request.path,
            configuration: request.configuration,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
            retired: CancellationToken::new(),
            state_tx,
            inner: Mutex::new(EntryInner {
                state: InstanceState::None,
                fault: None,
                info: None,
                started_at: None,
                finished_at: None,
                plugin: None,
                task: None,
                context: None,
                removed: false,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EntryInner> {
        self.inner.lock()
    }

    /// Current state, without taking the entry lock
    pub(crate) fn state(&self) -> InstanceState {
        *self.state_tx.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<InstanceState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn snapshot(&self) -> Instance {
        let inner = self.lock();
        self.snapshot_locked(&inner)
    }

    pub(crate) fn snapshot_locked(&self, inner: &EntryInner) -> Instance {
        Instance {
            id: self.id,
            name: self.name.clone(),
            path: self.path.clone(),
            state: inner.state,
            fault: inner.fault.clone(),
            version: inner.info.as_ref().map(|info| info.version.clone()),
            type_name: inner.info.as_ref().map(|info| info.type_name.clone()),
            created_at: self.created_at,
            started_at: inner.started_at,
            finished_at: inner.finished_at,
        }
    }

    /// Move to `next` if the lifecycle allows it, and publish the change
    pub(crate) fn transition(
        &self,
        inner: &mut EntryInner,
        next: InstanceState,
        events: &EventBus,
    ) -> bool {
        let old = inner.state;
        if !old.can_transition_to(next) {
            warn!(
                instance_id = self.id,
                from = %old,
                to = %next,
                "Rejected backward state transition"
            );
            return false;
        }

        inner.state = next;
        self.state_tx.send_replace(next);
        events.publish(StateChange {
            id: self.id,
            old,
            new: next,
            at: Utc::now(),
        });

        debug!(instance_id = self.id, from = %old, to = %next, "State changed");
        true
    }
}

/// What is left to do once the entry lock is released
enum Followup {
    Nothing,
    Retire(Option<Box<dyn Plugin>>, Option<LoadContext>),
}

/// Load, validate, configure and construct the plugin of `entry`
pub(crate) async fn load_instance(shared: Arc<HostShared>, entry: Arc<InstanceEntry>) {
    {
        let mut inner = entry.lock();
        if inner.removed {
            return;
        }
        entry.transition(&mut inner, InstanceState::PlugInLoading, &shared.events);
    }

    let (lock_key, path_lock) = shared.path_lock(&entry.path).await;
    let guard = path_lock.lock().await;

    let job = {
        let shared = shared.clone();
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || prepare(&shared, &entry))
    };
    let (context, outcome) = match job.await {
        Ok(result) => result,
        Err(e) => (
            None,
            Err(HostError::activation(format!("load task failed: {e}"))),
        ),
    };
    drop(guard);
    shared.release_path_lock(&lock_key, path_lock);

    let followup = {
        let mut inner = entry.lock();
        if inner.removed {
            debug!(instance_id = entry.id, "Instance removed while loading");
            Followup::Retire(outcome.ok().map(|(plugin, _)| plugin), context)
        } else {
            match outcome {
                Ok((plugin, info)) => {
                    info!(
                        instance_id = entry.id,
                        plugin = %info.type_name,
                        version = %info.version,
                        "Plugin loaded"
                    );
                    inner.info = Some(info);
                    inner.plugin = Some(plugin);
                    inner.context = context;
                    entry.transition(&mut inner, InstanceState::PlugInLoaded, &shared.events);

                    if entry.cancel.is_cancelled() {
                        debug!(instance_id = entry.id, "Stop requested while loading");
                        inner.finished_at = Some(Utc::now());
                        entry.transition(&mut inner, InstanceState::Complete, &shared.events);
                    }
                    Followup::Nothing
                }
                Err(error) => {
                    warn!(
                        instance_id = entry.id,
                        path = %entry.path.display(),
                        error = %error,
                        "Plugin failed to load"
                    );
                    inner.fault = Some(Arc::new(error));
                    entry.transition(
                        &mut inner,
                        InstanceState::PlugInLoadFailure,
                        &shared.events,
                    );
                    Followup::Retire(None, context)
                }
            }
        }
    };

    if let Followup::Retire(plugin, context) = followup {
        retire(&shared.verifier, plugin, context).await;
    }
}

/// Blocking half of the load pipeline
fn prepare(
    shared: &HostShared,
    entry: &InstanceEntry,
) -> (
    Option<LoadContext>,
    Result<(Box<dyn Plugin>, PluginTypeInfo)>,
) {
    let mut context = LoadContext::new(
        entry.path.clone(),
        shared.loader.clone(),
        shared.shadow_directory(),
    );
    let outcome = build_plugin(shared, entry, &mut context);
    (Some(context), outcome)
}

fn build_plugin(
    shared: &HostShared,
    entry: &InstanceEntry,
    context: &mut LoadContext,
) -> Result<(Box<dyn Plugin>, PluginTypeInfo)> {
    let version = context.load()?.version().to_string();

    let candidates = context.resolve_types(ContractValidator::is_plugin_candidate);
    let descriptor = ContractValidator::select_plugin_type(candidates)?;
    let shape = ContractValidator::validate(&descriptor)?;
    let info = ContractValidator::describe(&descriptor, &shape, &version);

    let configuration = match (&shape.configuration, &entry.configuration) {
        (Some(declared), Some(json)) => Some(ConfigurationLoader::load(declared, json)?),
        (Some(_), None) => shared.factory.create_configuration(&descriptor),
        (None, Some(_)) => {
            warn!(
                instance_id = entry.id,
                plugin = %descriptor.name,
                "Plugin takes no configuration; ignoring persisted configuration"
            );
            None
        }
        (None, None) => None,
    };

    let plugin = shared.factory.create_instance(&descriptor, configuration)?;
    Ok((plugin, info))
}

/// Launch execution of a loaded instance; caller holds the entry lock
pub(crate) fn launch(
    shared: &Arc<HostShared>,
    entry: &Arc<InstanceEntry>,
    inner: &mut EntryInner,
) -> Result<()> {
    let plugin = inner
        .plugin
        .take()
        .ok_or_else(|| HostError::activation("plugin object is no longer available"))?;

    entry.transition(inner, InstanceState::Activating, &shared.events);

    let lease = inner
        .context
        .as_ref()
        .and_then(|context| context.binary().cloned());
    let context: Arc<dyn ExecutionContext> = Arc::new(TaskContext::new(
        entry.id,
        entry.name.clone(),
        entry.cancel.clone(),
    ));

    inner.started_at = Some(Utc::now());
    inner.task = Some(shared.runtime.spawn(execute(
        shared.clone(),
        entry.clone(),
        plugin,
        lease,
        context,
    )));

    entry.transition(inner, InstanceState::Active, &shared.events);
    Ok(())
}

async fn execute(
    shared: Arc<HostShared>,
    entry: Arc<InstanceEntry>,
    mut plugin: Box<dyn Plugin>,
    lease: Option<Arc<LoadedBinary>>,
    context: Arc<dyn ExecutionContext>,
) {
    debug!(instance_id = entry.id, "Execution started");
    let outcome = AssertUnwindSafe(plugin.execute(context))
        .catch_unwind()
        .await;

    // Errors and panic payloads may point into the plugin's binary; render
    // them to host strings and drop them before the lease is released.
    let (next, fault) = match outcome {
        Ok(Ok(())) => {
            info!(instance_id = entry.id, name = %entry.name, "Instance completed");
            (InstanceState::Complete, None)
        }
        Ok(Err(e)) => {
            let fault = HostError::execution(&e);
            drop(e);
            warn!(instance_id = entry.id, name = %entry.name, error = %fault, "Instance faulted");
            (InstanceState::Faulted, Some(fault))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            drop(payload);
            warn!(instance_id = entry.id, name = %entry.name, panic = %message, "Instance panicked");
            (InstanceState::Faulted, Some(HostError::ExecutionPanicked(message)))
        }
    };

    drop(plugin);
    drop(lease);

    let mut inner = entry.lock();
    inner.finished_at = Some(Utc::now());
    inner.fault = fault.map(Arc::new);
    inner.task = None;
    entry.transition(&mut inner, next, &shared.events);
}

/// Warn when a stopped instance keeps running
///
/// Cancellation is cooperative; a plugin ignoring it stays active and is
/// only reported.
pub(crate) fn watch_stop(shared: &HostShared, entry: &Arc<InstanceEntry>) {
    let after = shared.config.stop_warning_after;
    let entry = entry.clone();

    shared.runtime.spawn(async move {
        let settled = tokio::time::timeout(after, wait_until_settled(&entry)).await;
        if settled.is_err() {
            warn!(
                instance_id = entry.id,
                name = %entry.name,
                waited = ?after,
                "Instance still active after stop request; plugin ignores cancellation"
            );
        }
    });
}

/// Resolve once the instance is no longer activating or active
pub(crate) async fn wait_until_settled(entry: &InstanceEntry) {
    let mut states = entry.subscribe_state();
    loop {
        let running = states.borrow_and_update().is_running();
        if !running || states.changed().await.is_err() {
            return;
        }
    }
}

/// Drop the plugin, release the binary and confirm it is reclaimed
pub(crate) async fn retire(
    verifier: &UnloadVerifier,
    plugin: Option<Box<dyn Plugin>>,
    context: Option<LoadContext>,
) {
    drop(plugin);

    let Some(mut context) = context else {
        return;
    };

    let handle = verifier.track(&context);
    context.unload();
    drop(context);

    if !verifier.retire(&handle).await {
        warn!(context = %handle.context(), "Retired load context was not reclaimed");
    }
}

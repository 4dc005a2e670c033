//! Integration tests for the instance host

use plughost_api::testing::{fixtures, ModuleBuilder, SampleConfig};
use plughost_api::PluginModule;
use plughost_config::{ConfigBuilder, HostConfig};
use plughost_runtime::{
    ConfigurationError, ConfigurationLoader, ContractError, HostError, InstanceHost,
    InstanceQuery, InstanceRequest, InstanceState, StateChange, StaticLoader,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, Barrier};

const WAIT: Duration = Duration::from_secs(5);

fn cooperative_module() -> PluginModule {
    ModuleBuilder::new("cooperative")
        .version("2.1.0")
        .with_helper("cooperative::Settings")
        .with_type(fixtures::cooperative())
        .build()
}

fn immediate_module() -> PluginModule {
    ModuleBuilder::new("immediate")
        .with_type(fixtures::immediate())
        .build()
}

fn failing_module() -> PluginModule {
    ModuleBuilder::new("failing")
        .with_type(fixtures::failing())
        .build()
}

fn panicking_module() -> PluginModule {
    ModuleBuilder::new("panicking")
        .with_type(fixtures::panicking())
        .build()
}

fn configured_module() -> PluginModule {
    ModuleBuilder::new("configured")
        .with_type(fixtures::configured())
        .build()
}

fn empty_module() -> PluginModule {
    ModuleBuilder::new("empty")
        .with_helper("empty::Helper")
        .build()
}

fn crowded_module() -> PluginModule {
    ModuleBuilder::new("crowded")
        .with_type(fixtures::immediate())
        .with_type(fixtures::failing())
        .build()
}

fn broken_module() -> PluginModule {
    ModuleBuilder::new("broken")
        .with_type(fixtures::broken_constructor())
        .build()
}

const MODULES: [(&str, fn() -> PluginModule); 8] = [
    ("cooperative.so", cooperative_module),
    ("immediate.so", immediate_module),
    ("failing.so", failing_module),
    ("panicking.so", panicking_module),
    ("configured.so", configured_module),
    ("empty.so", empty_module),
    ("crowded.so", crowded_module),
    ("broken.so", broken_module),
];

/// Host backed by in-process modules and placeholder binaries on disk
struct Harness {
    dir: TempDir,
    host: InstanceHost,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(|builder| builder)
    }

    fn with_config(configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let loader = StaticLoader::new();
        for (file_name, build) in MODULES {
            fs::write(dir.path().join(file_name), file_name.as_bytes()).unwrap();
            loader.register(file_name, build);
        }

        let builder = ConfigBuilder::new()
            .unload(100, Duration::from_millis(1))
            .stop_warning_after(Duration::from_millis(200));
        let config: HostConfig = configure(builder).build().unwrap();

        let host = InstanceHost::builder()
            .config(config)
            .loader(Arc::new(loader))
            .build()
            .unwrap();

        Self { dir, host }
    }

    fn path(&self, file_name: &str) -> PathBuf {
        self.dir.path().join(file_name)
    }

    fn create(&self, id: i64, file_name: &str) -> plughost_runtime::Instance {
        self.host
            .create_instance(id, format!("instance-{id}"), self.path(file_name))
            .unwrap()
    }

    async fn wait(&self, id: i64, state: InstanceState) -> plughost_runtime::Instance {
        self.host.wait_for_state(id, state, WAIT).await.unwrap()
    }
}

async fn changes_of(
    events: &mut broadcast::Receiver<StateChange>,
    id: i64,
    until: InstanceState,
) -> Vec<StateChange> {
    let mut changes = Vec::new();
    tokio::time::timeout(WAIT, async {
        loop {
            let change = events.recv().await.unwrap();
            if change.id != id {
                continue;
            }
            changes.push(change);
            if change.new == until {
                break;
            }
        }
    })
    .await
    .unwrap();
    changes
}

#[tokio::test]
async fn test_full_lifecycle() {
    let harness = Harness::new();
    let host = &harness.host;

    let created = harness.create(1, "cooperative.so");
    assert_eq!(created.state, InstanceState::None);
    assert!(host.instance_exists(1));

    let loaded = harness.wait(1, InstanceState::PlugInLoaded).await;
    assert_eq!(loaded.version.as_deref(), Some("2.1.0"));
    assert!(loaded.type_name.unwrap().ends_with("CooperativePlugin"));

    let started = host.start_instance(1).await.unwrap();
    assert_eq!(started.state, InstanceState::Active);
    assert!(started.started_at.is_some());

    host.stop_instance(1).unwrap();
    let complete = harness.wait(1, InstanceState::Complete).await;
    assert!(complete.fault.is_none());
    assert!(complete.finished_at.is_some());

    host.remove_instance(1).unwrap();
    assert!(!host.instance_exists(1));
    assert_eq!(host.count(), 0);
}

#[tokio::test]
async fn test_state_changes_are_ordered() {
    let harness = Harness::new();
    let mut events = harness.host.subscribe();

    harness.create(1, "cooperative.so");
    harness.wait(1, InstanceState::PlugInLoaded).await;
    harness.host.start_instance(1).await.unwrap();
    harness.host.stop_instance(1).unwrap();

    let changes = changes_of(&mut events, 1, InstanceState::Complete).await;
    let states: Vec<_> = changes.iter().map(|change| change.new).collect();
    assert_eq!(
        states,
        vec![
            InstanceState::PlugInLoading,
            InstanceState::PlugInLoaded,
            InstanceState::Activating,
            InstanceState::Active,
            InstanceState::Complete,
        ]
    );

    assert_eq!(changes[0].old, InstanceState::None);
    for change in &changes {
        assert!(change.new.rank() > change.old.rank());
    }
    for pair in changes.windows(2) {
        assert_eq!(pair[0].new, pair[1].old);
    }
}

#[tokio::test]
async fn test_ids_and_names_are_unique() {
    let harness = Harness::new();
    harness.create(1, "immediate.so");

    let err = harness
        .host
        .create_instance(1, "other", harness.path("immediate.so"))
        .unwrap_err();
    assert!(matches!(err, HostError::InstanceExists(1)));

    let err = harness
        .host
        .create_instance(2, "instance-1", harness.path("immediate.so"))
        .unwrap_err();
    assert!(matches!(err, HostError::InstanceNameExists(ref name) if name == "instance-1"));
    assert!(err.is_conflict());

    assert_eq!(harness.host.count(), 1);
}

#[tokio::test]
async fn test_running_ceiling() {
    let harness = Harness::with_config(|builder| builder.max_running_instances(2));
    let host = &harness.host;

    for id in 1..=2 {
        harness.create(id, "cooperative.so");
        harness.wait(id, InstanceState::PlugInLoaded).await;
        host.start_instance(id).await.unwrap();
    }

    let err = host
        .create_instance(3, "instance-3", harness.path("cooperative.so"))
        .unwrap_err();
    assert!(matches!(err, HostError::MaxInstancesRunning(2)));

    host.stop_instance(1).unwrap();
    harness.wait(1, InstanceState::Complete).await;

    harness.create(3, "cooperative.so");
    assert_eq!(host.stats().running, 1);

    host.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_running_ceiling_applies_to_start() {
    let harness = Harness::with_config(|builder| builder.max_running_instances(1));
    let host = &harness.host;

    for id in 1..=2 {
        harness.create(id, "cooperative.so");
        harness.wait(id, InstanceState::PlugInLoaded).await;
    }

    host.start_instance(1).await.unwrap();
    let err = host.start_instance(2).await.unwrap_err();
    assert!(matches!(err, HostError::MaxInstancesRunning(1)));
    assert_eq!(host.get_instance(2).unwrap().state, InstanceState::PlugInLoaded);

    host.stop_instance(1).unwrap();
    harness.wait(1, InstanceState::Complete).await;

    let started = host.start_instance(2).await.unwrap();
    assert_eq!(started.state, InstanceState::Active);

    host.shutdown(WAIT).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_with_one_id() {
    let harness = Harness::new();
    let barrier = Arc::new(Barrier::new(16));

    let mut tasks = Vec::new();
    for n in 0..16 {
        let host = harness.host.clone();
        let path = harness.path("immediate.so");
        let barrier = barrier.clone();
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            host.create_instance(1, format!("racer-{n}"), path)
        }));
    }

    let mut created = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(err) => assert!(matches!(err, HostError::InstanceExists(1))),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(harness.host.count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_with_one_name() {
    let harness = Harness::new();
    let barrier = Arc::new(Barrier::new(16));

    let mut tasks = Vec::new();
    for id in 1..=16 {
        let host = harness.host.clone();
        let path = harness.path("immediate.so");
        let barrier = barrier.clone();
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            host.create_instance(id, "shared-name", path)
        }));
    }

    let mut created = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(err) => {
                assert!(matches!(err, HostError::InstanceNameExists(ref name) if name == "shared-name"))
            }
        }
    }

    assert_eq!(created, 1);
    assert_eq!(harness.host.count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_against_full_ceiling() {
    let harness = Harness::with_config(|builder| builder.max_running_instances(2));
    for id in 1..=2 {
        harness.create(id, "cooperative.so");
        harness.wait(id, InstanceState::PlugInLoaded).await;
        harness.host.start_instance(id).await.unwrap();
    }

    let barrier = Arc::new(Barrier::new(8));
    let mut tasks = Vec::new();
    for id in 3..=10 {
        let host = harness.host.clone();
        let path = harness.path("cooperative.so");
        let barrier = barrier.clone();
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            host.create_instance(id, format!("instance-{id}"), path)
        }));
    }

    for task in tasks {
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, HostError::MaxInstancesRunning(2)));
    }
    assert_eq!(harness.host.count(), 2);

    harness.host.shutdown(WAIT).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_respect_ceiling() {
    let harness = Harness::with_config(|builder| builder.max_running_instances(2));
    for id in 1..=6 {
        harness.create(id, "cooperative.so");
        harness.wait(id, InstanceState::PlugInLoaded).await;
    }

    let barrier = Arc::new(Barrier::new(6));
    let mut tasks = Vec::new();
    for id in 1..=6 {
        let host = harness.host.clone();
        let barrier = barrier.clone();
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            host.start_instance(id).await
        }));
    }

    let mut started = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => started += 1,
            Err(err) => assert!(matches!(err, HostError::MaxInstancesRunning(2))),
        }
    }

    assert_eq!(started, 2);
    let stats = harness.host.stats();
    assert_eq!(stats.running, 2);
    assert_eq!(stats.loaded, 4);

    harness.host.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_running_instance_cannot_be_removed() {
    let harness = Harness::new();
    harness.create(1, "cooperative.so");
    harness.host.start_instance(1).await.unwrap();

    let err = harness.host.remove_instance(1).unwrap_err();
    assert!(matches!(err, HostError::InstanceRunning(1)));
    assert!(harness.host.instance_exists(1));

    harness.host.stop_instance(1).unwrap();
    harness.wait(1, InstanceState::Complete).await;
    harness.host.remove_instance(1).unwrap();
    assert!(harness.host.remove_instance(1).unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_pending_instance_can_be_removed() {
    let harness = Harness::new();
    harness.create(1, "cooperative.so");

    harness.host.remove_instance(1).unwrap();
    assert!(!harness.host.instance_exists(1));
    assert!(harness.host.start_instance(1).await.unwrap_err().is_not_found());

    // The id is free again once the pending load has been abandoned.
    harness.create(1, "cooperative.so");
    harness.wait(1, InstanceState::PlugInLoaded).await;
}

#[tokio::test]
async fn test_start_waits_for_load_and_is_idempotent() {
    let harness = Harness::new();
    harness.create(1, "cooperative.so");

    let first = harness.host.start_instance(1).await.unwrap();
    assert_eq!(first.state, InstanceState::Active);

    let second = harness.host.start_instance(1).await.unwrap();
    assert_eq!(second.state, InstanceState::Active);
    assert_eq!(second.started_at, first.started_at);
    assert_eq!(harness.host.stats().running, 1);

    assert_eq!(harness.host.shutdown(WAIT).await, 0);
    assert_eq!(
        harness.host.get_instance(1).unwrap().state,
        InstanceState::Complete
    );
}

#[tokio::test]
async fn test_missing_plugin_type() {
    let harness = Harness::new();
    harness.create(1, "empty.so");

    let failed = harness.wait(1, InstanceState::PlugInLoadFailure).await;
    let fault = failed.fault.unwrap();
    assert!(matches!(
        fault.as_ref(),
        HostError::Contract(ContractError::PluginTypeNotFound)
    ));
    assert!(failed.type_name.is_none());
}

#[tokio::test]
async fn test_multiple_plugin_types() {
    let harness = Harness::new();
    harness.create(1, "crowded.so");

    let failed = harness.wait(1, InstanceState::PlugInLoadFailure).await;
    assert!(matches!(
        failed.fault.unwrap().as_ref(),
        HostError::Contract(ContractError::PluginTypesFound(2))
    ));

    let err = harness.host.start_instance(1).await.unwrap_err();
    assert!(matches!(
        err,
        HostError::InstanceNotStartable {
            id: 1,
            state: InstanceState::PlugInLoadFailure
        }
    ));
}

#[tokio::test]
async fn test_constructor_failure() {
    let harness = Harness::new();
    harness.create(1, "broken.so");

    let failed = harness.wait(1, InstanceState::PlugInLoadFailure).await;
    assert!(failed
        .fault_message()
        .unwrap()
        .contains("missing calibration data"));
}

#[tokio::test]
async fn test_plugin_error_faults_instance() {
    let harness = Harness::new();
    harness.create(1, "failing.so");
    harness.host.start_instance(1).await.unwrap();

    let faulted = harness.wait(1, InstanceState::Faulted).await;
    assert!(matches!(
        faulted.fault.as_deref(),
        Some(HostError::ExecutionFailed(message)) if message.contains("sensor offline")
    ));

    harness.host.remove_instance(1).unwrap();
    assert!(!harness.host.instance_exists(1));
    assert!(harness.host.get_instance(1).unwrap_err().is_not_found());

    // The snapshot outlives the instance and its retired binary.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        faulted.fault_message().as_deref(),
        Some("Plugin execution failed: Runtime error: sensor offline")
    );
}

#[tokio::test]
async fn test_plugin_panic_faults_instance() {
    let harness = Harness::new();
    harness.create(1, "panicking.so");
    harness.create(2, "immediate.so");
    harness.host.start_instance(1).await.unwrap();

    let faulted = harness.wait(1, InstanceState::Faulted).await;
    assert!(matches!(
        faulted.fault.as_deref(),
        Some(HostError::ExecutionPanicked(message)) if message.contains("lost its mind")
    ));

    harness.host.start_instance(2).await.unwrap();
    harness.wait(2, InstanceState::Complete).await;
}

#[tokio::test]
async fn test_unreachable_state_is_reported() {
    let harness = Harness::new();
    harness.create(1, "failing.so");
    harness.host.start_instance(1).await.unwrap();

    let err = harness
        .host
        .wait_for_state(1, InstanceState::Complete, WAIT)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HostError::UnexpectedState {
            expected: InstanceState::Complete,
            actual: InstanceState::Faulted,
            ..
        }
    ));
}

#[tokio::test]
async fn test_stop_before_start_completes() {
    let harness = Harness::new();
    harness.create(1, "cooperative.so");
    harness.wait(1, InstanceState::PlugInLoaded).await;

    harness.host.stop_instance(1).unwrap();
    assert_eq!(
        harness.host.get_instance(1).unwrap().state,
        InstanceState::Complete
    );

    let err = harness.host.start_instance(1).await.unwrap_err();
    assert!(matches!(err, HostError::InstanceNotStartable { .. }));
}

#[tokio::test]
async fn test_persisted_configuration_reaches_plugin() {
    let harness = Harness::new();

    let json = ConfigurationLoader::save(&SampleConfig::populated()).unwrap();
    harness
        .host
        .create_instance_with(
            InstanceRequest::new(1, "configured", harness.path("configured.so"))
                .with_configuration(json),
        )
        .unwrap();
    harness.host.start_instance(1).await.unwrap();
    harness.wait(1, InstanceState::Complete).await;

    // Without persisted configuration the plugin gets the default, whose label is empty.
    harness
        .host
        .create_instance(2, "defaulted", harness.path("configured.so"))
        .unwrap();
    harness.host.start_instance(2).await.unwrap();
    let faulted = harness.wait(2, InstanceState::Faulted).await;
    assert!(faulted.fault_message().unwrap().contains("label"));
}

#[tokio::test]
async fn test_invalid_configuration_fails_load() {
    let harness = Harness::new();
    harness
        .host
        .create_instance_with(
            InstanceRequest::new(1, "configured", harness.path("configured.so"))
                .with_configuration(r#"{"colour":"blue"}"#),
        )
        .unwrap();

    let failed = harness.wait(1, InstanceState::PlugInLoadFailure).await;
    assert!(matches!(
        failed.fault.as_deref(),
        Some(HostError::Configuration(ConfigurationError::UnmappedProperty(name))) if name == "colour"
    ));
}

#[tokio::test]
async fn test_instances_sharing_a_binary() {
    let harness = Harness::new();
    harness.create(1, "cooperative.so");
    harness.create(2, "cooperative.so");

    harness.host.start_instance(1).await.unwrap();
    harness.host.start_instance(2).await.unwrap();

    harness.host.stop_instance(1).unwrap();
    harness.wait(1, InstanceState::Complete).await;
    assert_eq!(
        harness.host.get_instance(2).unwrap().state,
        InstanceState::Active
    );

    harness.host.remove_instance(1).unwrap();
    assert_eq!(harness.host.shutdown(WAIT).await, 0);
}

#[tokio::test]
async fn test_shadow_copies_are_retired() {
    let shadow = tempfile::tempdir().unwrap();
    let shadow_path = shadow.path().join("copies");
    let harness = Harness::with_config(|builder| builder.shadow_copy(&shadow_path));

    harness.create(1, "immediate.so");
    harness.wait(1, InstanceState::PlugInLoaded).await;
    assert_eq!(fs::read_dir(&shadow_path).unwrap().count(), 1);

    // The original stays replaceable while its copy is loaded.
    fs::write(harness.path("immediate.so"), b"rebuilt").unwrap();

    harness.host.start_instance(1).await.unwrap();
    harness.wait(1, InstanceState::Complete).await;
    harness.host.remove_instance(1).unwrap();

    let retired = tokio::time::timeout(WAIT, async {
        while fs::read_dir(&shadow_path).unwrap().count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(retired.is_ok());
}

#[tokio::test]
async fn test_listing_and_stats() {
    let harness = Harness::new();
    for id in [3, 1, 2] {
        harness.create(id, "immediate.so");
    }
    harness.create(4, "empty.so");

    for id in 1..=3 {
        harness.wait(id, InstanceState::PlugInLoaded).await;
    }
    harness.wait(4, InstanceState::PlugInLoadFailure).await;

    let all = harness.host.list_instances(&InstanceQuery::all());
    let ids: Vec<_> = all.iter().map(|instance| instance.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    let page = harness.host.list_instances(&InstanceQuery::all().page(1, 2));
    let ids: Vec<_> = page.iter().map(|instance| instance.id).collect();
    assert_eq!(ids, vec![2, 3]);

    let failed = harness
        .host
        .list_instances(&InstanceQuery::all().state(InstanceState::PlugInLoadFailure));
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, 4);

    let stats = harness.host.stats();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.loaded, 3);
    assert_eq!(stats.load_failed, 1);
    assert_eq!(stats.running, 0);
}

#[tokio::test]
async fn test_wait_times_out() {
    let harness = Harness::new();
    harness.create(1, "cooperative.so");
    harness.host.start_instance(1).await.unwrap();

    let err = harness
        .host
        .wait_for_state(1, InstanceState::Complete, Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HostError::Timeout {
            id: 1,
            state: InstanceState::Active
        }
    ));

    assert_eq!(harness.host.shutdown(WAIT).await, 0);
}

//! Integration tests loading real `cdylib` plugins
//!
//! The sensor-heartbeat plugin and the fixture libraries under
//! `tests/fixtures` are built with cargo on first use. Set
//! `PLUGHOST_HEARTBEAT_LIB` to reuse an already built heartbeat library.

#![cfg(target_os = "linux")]

use plughost_config::ConfigBuilder;
use plughost_runtime::{
    BinaryLoader, ContractValidator, HostError, Instance, InstanceHost, InstanceRequest,
    InstanceState, LoadContext, LoadError, NativeLoader, UnloadVerifier, ABI_VERSION,
};
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

static HEARTBEAT: OnceLock<PathBuf> = OnceLock::new();
static FUTURE_ABI: OnceLock<PathBuf> = OnceLock::new();
static ENTRYLESS: OnceLock<PathBuf> = OnceLock::new();

fn heartbeat_library() -> &'static Path {
    HEARTBEAT.get_or_init(|| {
        if let Some(path) = std::env::var_os("PLUGHOST_HEARTBEAT_LIB") {
            return PathBuf::from(path);
        }

        let workspace = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
        build_library(
            &workspace.join("Cargo.toml"),
            &["-p", "sensor-heartbeat"],
            "sensor_heartbeat",
        )
    })
}

fn fixture_library(cell: &'static OnceLock<PathBuf>, crate_name: &str) -> &'static Path {
    cell.get_or_init(|| {
        let manifest = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(crate_name)
            .join("Cargo.toml");
        build_library(&manifest, &[], crate_name)
    })
}

fn build_library(manifest: &Path, args: &[&str], crate_name: &str) -> PathBuf {
    let target_dir = Path::new(env!("CARGO_TARGET_TMPDIR"))
        .join("native-plugins")
        .join(crate_name);

    let status = Command::new(cargo_bin())
        .arg("build")
        .arg("--manifest-path")
        .arg(manifest)
        .arg("--target-dir")
        .arg(&target_dir)
        .args(args)
        .status()
        .expect("spawn cargo build for plugin library");
    assert!(status.success(), "building {} failed", manifest.display());

    let library = target_dir
        .join("debug")
        .join(format!("{DLL_PREFIX}{crate_name}{DLL_SUFFIX}"));
    assert!(library.is_file(), "missing {}", library.display());
    library
}

fn cargo_bin() -> String {
    std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string())
}

/// Whether any file under `directory` is mapped into this process
fn is_mapped(directory: &Path) -> bool {
    let maps = fs::read_to_string("/proc/self/maps").unwrap();
    let directory = directory.to_string_lossy();
    maps.lines().any(|line| line.contains(directory.as_ref()))
}

fn file_count(directory: &Path) -> usize {
    match fs::read_dir(directory) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

/// Shadow copies are deleted only once their binary is confirmed unloaded
async fn wait_until_retired(directory: &Path) {
    tokio::time::timeout(WAIT, async {
        while file_count(directory) > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("shadow copy was not retired");
}

/// Native host with shadow copies in a private directory
struct NativeHarness {
    _dir: TempDir,
    shadow: PathBuf,
    host: InstanceHost,
}

impl NativeHarness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let shadow = dir.path().canonicalize().unwrap().join("shadow");

        let config = ConfigBuilder::new()
            .shadow_copy(&shadow)
            .unload(500, Duration::from_millis(5))
            .build()
            .unwrap();
        let host = InstanceHost::builder().config(config).build().unwrap();

        Self {
            _dir: dir,
            shadow,
            host,
        }
    }

    fn create(&self, id: i64, configuration: &str) -> Instance {
        let request = InstanceRequest::new(id, format!("heartbeat-{id}"), heartbeat_library())
            .with_configuration(configuration);
        self.host.create_instance_with(request).unwrap()
    }

    async fn wait(&self, id: i64, state: InstanceState) -> Instance {
        self.host.wait_for_state(id, state, WAIT).await.unwrap()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_heartbeat_runs_end_to_end() {
    let harness = NativeHarness::new();
    let host = &harness.host;

    let created = harness.create(
        1,
        r#"{"interval": "10ms", "sensor": "boiler", "max_beats": 0, "fail_after": 0}"#,
    );
    assert_eq!(created.state, InstanceState::None);

    let loaded = harness.wait(1, InstanceState::PlugInLoaded).await;
    assert!(loaded.type_name.unwrap().ends_with("HeartbeatPlugin"));
    assert_eq!(loaded.version.as_deref(), Some(env!("CARGO_PKG_VERSION")));
    assert_eq!(file_count(&harness.shadow), 1);
    assert!(is_mapped(&harness.shadow));

    let started = host.start_instance(1).await.unwrap();
    assert_eq!(started.state, InstanceState::Active);
    tokio::time::sleep(Duration::from_millis(50)).await;

    host.stop_instance(1).unwrap();
    let complete = harness.wait(1, InstanceState::Complete).await;
    assert!(complete.fault.is_none());

    host.remove_instance(1).unwrap();
    assert!(!host.instance_exists(1));

    wait_until_retired(&harness.shadow).await;
    assert!(!is_mapped(&harness.shadow));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fault_outlives_unloaded_binary() {
    let harness = NativeHarness::new();
    let host = &harness.host;

    harness.create(
        1,
        r#"{"interval": "5ms", "sensor": "boiler", "max_beats": 0, "fail_after": 2}"#,
    );
    harness.wait(1, InstanceState::PlugInLoaded).await;
    host.start_instance(1).await.unwrap();

    let faulted = harness.wait(1, InstanceState::Faulted).await;
    let expected = "Plugin execution failed: Runtime error: boiler lost contact after 2 heartbeats";
    assert!(matches!(faulted.fault.as_deref(), Some(HostError::ExecutionFailed(_))));
    assert_eq!(faulted.fault_message().as_deref(), Some(expected));

    host.remove_instance(1).unwrap();
    assert!(!host.instance_exists(1));

    wait_until_retired(&harness.shadow).await;
    assert!(!is_mapped(&harness.shadow));

    assert_eq!(faulted.fault_message().as_deref(), Some(expected));
    drop(faulted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_instances_load_separate_copies() {
    let harness = NativeHarness::new();
    let configuration = r#"{"interval": "10ms", "sensor": "boiler", "max_beats": 0, "fail_after": 0}"#;

    for id in 1..=2 {
        harness.create(id, configuration);
        harness.wait(id, InstanceState::PlugInLoaded).await;
    }
    assert_eq!(file_count(&harness.shadow), 2);

    harness.host.stop_instance(1).unwrap();
    harness.host.remove_instance(1).unwrap();
    tokio::time::timeout(WAIT, async {
        while file_count(&harness.shadow) > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(is_mapped(&harness.shadow));

    harness.host.start_instance(2).await.unwrap();
    harness.host.stop_instance(2).unwrap();
    harness.wait(2, InstanceState::Complete).await;
    harness.host.remove_instance(2).unwrap();

    wait_until_retired(&harness.shadow).await;
    assert!(!is_mapped(&harness.shadow));
}

#[tokio::test]
async fn test_load_context_unmaps_retired_library() {
    let dir = tempfile::tempdir().unwrap();
    let shadow = dir.path().canonicalize().unwrap().join("shadow");
    let mut context = LoadContext::new(
        heartbeat_library(),
        Arc::new(NativeLoader::new()),
        Some(shadow.clone()),
    );

    let binary = context.load().unwrap();
    assert_eq!(binary.module().name, "sensor-heartbeat");
    drop(binary);

    let candidates = context.resolve_types(ContractValidator::is_plugin_candidate);
    let descriptor = ContractValidator::select_plugin_type(candidates).unwrap();
    let shape = ContractValidator::validate(&descriptor).unwrap();
    assert!(shape.has_logger);
    assert!(shape.has_configuration);
    drop(descriptor);
    drop(shape);
    assert!(is_mapped(&shadow));

    let verifier = UnloadVerifier::new(100, Duration::from_millis(5));
    let handle = verifier.track(&context);
    context.unload();
    drop(context);

    assert!(verifier.retire(&handle).await);
    assert!(handle.is_unloaded());
    assert_eq!(file_count(&shadow), 0);
    assert!(!is_mapped(&shadow));
}

#[test]
fn test_native_loader_rejects_newer_abi() {
    let library = fixture_library(&FUTURE_ABI, "future_abi");

    let err = NativeLoader::new().open(library, library).unwrap_err();
    assert!(matches!(
        err,
        LoadError::AbiMismatch {
            expected: ABI_VERSION,
            found: u32::MAX,
        }
    ));
}

#[test]
fn test_native_loader_requires_module_entry() {
    assert_eq!(ABI_VERSION, 1, "entryless fixture exports ABI version 1");
    let library = fixture_library(&ENTRYLESS, "entryless");

    let err = NativeLoader::new().open(library, library).unwrap_err();
    assert!(matches!(
        err,
        LoadError::SymbolNotFound { ref symbol, .. } if symbol == "plughost_module"
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_host_reports_abi_mismatch() {
    let harness = NativeHarness::new();
    let library = fixture_library(&FUTURE_ABI, "future_abi");

    harness
        .host
        .create_instance(1, "future", library)
        .unwrap();
    let failed = harness.wait(1, InstanceState::PlugInLoadFailure).await;

    assert!(matches!(
        failed.fault.as_deref(),
        Some(HostError::Load(LoadError::AbiMismatch { .. }))
    ));

    harness.host.remove_instance(1).unwrap();
    wait_until_retired(&harness.shadow).await;
}

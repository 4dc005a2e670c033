//! Plughost CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plughost_config::{load_config, HostConfig};
use plughost_runtime::{
    BinaryLoader, ConfigurationLoader, ContractValidator, InstanceHost, InstanceState,
    LoadContext, NativeLoader, UnloadVerifier,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "plughost")]
#[command(about = "Plughost plugin host", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the instances declared in a configuration file
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "plughost.yaml")]
        config: PathBuf,

        /// Log level (trace, debug, info, warn, error); overrides the file
        #[arg(short, long)]
        log_level: Option<String>,
    },

    /// Load a plugin binary and describe its plugin type
    Inspect {
        /// Path to the plugin binary
        binary: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "plughost.yaml")]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, log_level } => {
            let path = config;
            let config = load_config(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;

            let level = log_level.unwrap_or_else(|| config.logging.level.clone());
            init_tracing(&level, &config.logging.format)?;

            tracing::info!(config = %path.display(), "Starting Plughost");
            run(config).await
        }

        Commands::Inspect { binary } => {
            init_tracing("warn", "text")?;
            inspect(binary).await
        }

        Commands::Validate { config } => {
            tracing_subscriber::fmt().with_target(false).init();

            tracing::info!("Validating configuration: {}", config.display());

            match load_config(&config) {
                Ok(cfg) => {
                    tracing::info!("✓ Configuration is valid");
                    tracing::info!("  Max running instances: {}", cfg.max_running_instances);
                    tracing::info!("  Shadow copies: {}", cfg.shadow_copy.enabled);
                    tracing::info!("  Instances: {}", cfg.instances.len());
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("✗ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("Plughost");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            println!("Plugin ABI: {}", plughost_runtime::ABI_VERSION);
            Ok(())
        }
    }
}

async fn run(config: HostConfig) -> Result<()> {
    let grace = config.stop_warning_after;
    let declared = config.instances.clone();
    let host = InstanceHost::new(config)?;

    let mut events = host.subscribe();
    tokio::spawn(async move {
        while let Ok(change) = events.recv().await {
            tracing::info!(
                instance_id = change.id,
                from = %change.old,
                to = %change.new,
                "Instance state changed"
            );
        }
    });

    for instance in &declared {
        if let Err(e) = host.create_from_config(instance) {
            tracing::error!(instance_id = instance.id, error = %e, "Failed to create instance");
        }
    }

    for instance in declared.iter().filter(|instance| instance.autostart) {
        if !host.instance_exists(instance.id) {
            continue;
        }
        if let Err(e) = host.start_instance(instance.id).await {
            tracing::error!(instance_id = instance.id, error = %e, "Failed to start instance");
        }
    }

    let stats = host.stats();
    tracing::info!(
        instances = stats.total,
        running = stats.running,
        "Host running, press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    let still_running = host.shutdown(grace).await;
    for instance in host.list_instances(&Default::default()) {
        if instance.state == InstanceState::Faulted {
            tracing::warn!(
                instance_id = instance.id,
                fault = %instance.fault_message().unwrap_or_default(),
                "Instance faulted"
            );
        }
    }

    if still_running > 0 {
        tracing::warn!(still_running, "Exiting with instances still running");
    }
    tracing::info!("Host stopped");
    Ok(())
}

async fn inspect(binary: PathBuf) -> Result<()> {
    let loader: Arc<dyn BinaryLoader> = Arc::new(NativeLoader::new());
    let mut context = LoadContext::new(binary, loader, None);

    let description = describe(&mut context);

    let verifier = UnloadVerifier::default();
    let handle = verifier.track(&context);
    context.unload();
    drop(context);
    if !verifier.await_unload(&handle).await {
        tracing::warn!("Binary was not reclaimed after inspection");
    }

    println!("{}", serde_json::to_string_pretty(&description?)?);
    Ok(())
}

/// Everything the host would learn about the binary, as JSON
fn describe(context: &mut LoadContext) -> Result<serde_json::Value> {
    let version = context.load()?.version().to_string();
    let candidates = context.resolve_types(ContractValidator::is_plugin_candidate);
    let descriptor = ContractValidator::select_plugin_type(candidates)?;
    let shape = ContractValidator::validate(&descriptor)?;
    let info = ContractValidator::describe(&descriptor, &shape, &version);

    let configuration = match &shape.configuration {
        Some(declared) => {
            let defaults = declared.create_default();
            Some(serde_json::from_str::<serde_json::Value>(
                &ConfigurationLoader::save(defaults.as_ref())?,
            )?)
        }
        None => None,
    };

    Ok(serde_json::json!({
        "plugin": info,
        "configuration": configuration,
    }))
}

fn init_tracing(level: &str, format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_level(true),
            )
            .init();
    }

    Ok(())
}

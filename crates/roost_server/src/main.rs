//! roost server binary: loads configuration, wires the node tracker to its
//! collaborators, and runs until interrupted. The RPC transport plugs in at
//! the handler boundary and is owned elsewhere.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use roost_common::config::RoostConfig;
use roost_tracker::ports::{
    FlatRackResolver, InMemoryAppRegistry, InMemoryAttributeStore, InMemoryKeyStore,
    InMemoryLabelStore, RecordingDelegatedUpdater, StaticNodesList, SystemHostResolver,
};
use roost_tracker::{NodeTracker, TrackerPorts};

/// Version reported to agents and used by the `EqualToRM` version floor.
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "roost", about = "roost — cluster resource manager node tracker")]
struct Cli {
    /// Config file path.
    #[arg(short, long, default_value = "roost.toml")]
    config: String,

    /// Tracker bind address (overrides config).
    #[arg(long)]
    bind_addr: Option<String>,

    /// Minimum node agent version (overrides config).
    #[arg(long)]
    min_version: Option<String>,

    /// Print the default configuration as TOML and exit.
    #[arg(long)]
    print_default_config: bool,
}

fn init_tracing() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,roost=debug"));
    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn load_config(path: &str) -> RoostConfig {
    if !Path::new(path).exists() {
        tracing::info!(path, "no config file found, using defaults");
        return RoostConfig::default();
    }
    match std::fs::read_to_string(path) {
        Ok(text) => match toml::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path, "failed to parse config ({e}), using defaults");
                RoostConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(path, "failed to read config ({e}), using defaults");
            RoostConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_default_config {
        let toml_str = toml::to_string_pretty(&RoostConfig::default())
            .unwrap_or_else(|e| format!("# failed to serialize default config: {}", e));
        println!("{}", toml_str);
        return Ok(());
    }

    init_tracing();
    tracing::info!(version = SERVER_VERSION, "starting roost node tracker...");

    let mut config = load_config(&cli.config);
    if let Some(ref addr) = cli.bind_addr {
        config.tracker.bind_addr = addr.clone();
    }
    if let Some(ref min) = cli.min_version {
        config.tracker.min_version = min.clone();
    }

    let ports = TrackerPorts {
        nodes_list: Arc::new(StaticNodesList::new()),
        rack_resolver: Arc::new(FlatRackResolver::default()),
        host_resolver: Arc::new(SystemHostResolver),
        label_manager: Arc::new(InMemoryLabelStore::new()),
        delegated_labels: Arc::new(RecordingDelegatedUpdater::new()),
        attributes: Arc::new(InMemoryAttributeStore::new()),
        container_token_keys: Arc::new(InMemoryKeyStore::new(1)),
        node_token_keys: Arc::new(InMemoryKeyStore::new(1)),
        apps: Arc::new(InMemoryAppRegistry::new()),
        queue_limits: None,
    };
    let tracker = NodeTracker::new(config.tracker.clone(), SERVER_VERSION, ports);
    tracker.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping node tracker");
    tracker.stop();
    Ok(())
}

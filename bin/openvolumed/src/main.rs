//! OpenVolume node daemon
//!
//! Brings up the configured volume drivers on this node, registers the
//! node in the cluster database and keeps its entry fresh until shutdown.

mod membership;

use anyhow::{Context, Result};
use clap::Parser;
use membership::Membership;
use openvolume_cluster::{ClusterDatabase, ClusterDbResult};
use openvolume_common::Config;
use openvolume_drivers::{NodeContext, register_builtin};
use openvolume_kvdb::open_kvdb;
use openvolume_volume::{DriverParams, DriverRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "openvolumed")]
#[command(about = "OpenVolume node daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/openvolume/openvolumed.toml")]
    config: String,

    /// Node ID (overrides config file)
    #[arg(long)]
    node_id: Option<String>,

    /// Log level (overrides config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Key-value store file (overrides config file)
    #[arg(long)]
    kvdb_path: Option<PathBuf>,
}

/// Load the config file, falling back to defaults when it is missing or
/// unparsable. Logging is not up yet, so problems go to stderr.
fn load_config(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }
    match std::fs::read_to_string(path) {
        Ok(s) => toml::from_str(&s).unwrap_or_else(|e| {
            eprintln!("Warning: Failed to parse config file: {}", e);
            Config::default()
        }),
        Err(e) => {
            eprintln!("Warning: Failed to read config file: {}", e);
            Config::default()
        }
    }
}

/// CLI flags take precedence over the file
fn merge_args(mut config: Config, args: &Args) -> Config {
    if let Some(id) = &args.node_id {
        config.node.id.clone_from(id);
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    if let Some(path) = &args.kvdb_path {
        config.kvdb.path.clone_from(path);
    }
    config
}

fn start_drivers(registry: &DriverRegistry, config: &Config) -> Result<()> {
    for driver in &config.drivers {
        let params = DriverParams::from(driver.params.clone());
        if let Err(e) = registry.new_driver(&driver.name, &params) {
            error!("Failed to start driver '{}': {}", driver.name, e);
            return Err(e).with_context(|| format!("starting driver '{}'", driver.name));
        }
        info!("Driver '{}' started", driver.name);
    }
    Ok(())
}

/// Run a membership update on the blocking pool; the store calls do file I/O
async fn off_runtime(
    membership: &Arc<Membership>,
    op: fn(&Membership) -> ClusterDbResult<()>,
) -> Result<()> {
    let membership = membership.clone();
    tokio::task::spawn_blocking(move || op(&membership))
        .await
        .context("membership task failed")??;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = merge_args(load_config(Path::new(&args.config)), &args);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting OpenVolume daemon");
    info!("Config file: {}", args.config);

    let kv = open_kvdb(&config.kvdb)
        .with_context(|| format!("opening kvdb at {}", config.kvdb.path.display()))?;
    info!("Key-value store: {}", kv.name());

    let node_id = config.node.resolved_id();
    info!("Node ID: {}", node_id);

    let registry = DriverRegistry::new();
    register_builtin(
        &registry,
        kv.clone(),
        NodeContext::new(node_id.clone(), config.node.data_dir.clone()),
    )?;
    info!("Registered drivers: {}", registry.registered().join(", "));

    if let Err(e) = start_drivers(&registry, &config) {
        registry.shutdown();
        return Err(e);
    }

    let membership = Arc::new(Membership::new(
        ClusterDatabase::new(kv),
        &node_id,
        &config.node.ip,
    ));
    if let Err(e) = off_runtime(&membership, Membership::join).await {
        registry.shutdown();
        return Err(e).context("joining cluster");
    }

    let mut heartbeat = tokio::time::interval(Duration::from_secs(config.node.heartbeat_secs.max(1)));
    heartbeat.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = heartbeat.tick() => {
                if let Err(e) = off_runtime(&membership, Membership::heartbeat).await {
                    warn!("Heartbeat failed: {:#}", e);
                }
            }
        }
    }

    info!("Shutting down...");
    if let Err(e) = off_runtime(&membership, Membership::leave).await {
        warn!("Failed to mark node {} down: {:#}", node_id, e);
    }
    registry.shutdown();
    info!("OpenVolume daemon shut down gracefully");

    Ok(())
}

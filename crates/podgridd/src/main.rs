//! podgridd: the podgrid daemon.
//!
//! # Usage
//!
//! ```text
//! podgridd validate --config podgrid.toml
//! podgridd simulate --config podgrid.toml --cluster cluster.json --timeout-secs 30
//! ```
//!
//! `simulate` seeds an in-memory cluster from a JSON fixture, runs the
//! full scheduler against it, and prints the resulting bindings.

mod fixture;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use podgrid_scheduler::{ConfigFactory, MemoryClusterClient, SchedulerConfig};
use podgrid_types::{Binding, Pod, PodConditionType};

use crate::fixture::ClusterFixture;

#[derive(Parser)]
#[command(name = "podgridd", about = "podgrid pod placement daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a configuration file and resolve its plugins.
    Validate {
        /// Scheduler configuration (TOML).
        #[arg(long)]
        config: PathBuf,

        /// Print the effective configuration.
        #[arg(long)]
        print: bool,
    },
    /// Schedule the pending pods of a cluster fixture.
    Simulate {
        /// Scheduler configuration (TOML); defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Cluster fixture (JSON).
        #[arg(long)]
        cluster: PathBuf,

        /// Give up on pods still pending after this many seconds.
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Validate { config, print } => validate(&config, print),
        Command::Simulate {
            config,
            cluster,
            timeout_secs,
        } => simulate(config.as_deref(), &cluster, Duration::from_secs(timeout_secs)).await,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,podgrid=debug,podgridd=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SchedulerConfig> {
    match path {
        Some(path) => {
            let config = SchedulerConfig::from_file(path)?;
            info!(path = %path.display(), scheduler = %config.scheduler_name, "configuration loaded");
            Ok(config)
        }
        None => Ok(SchedulerConfig::default()),
    }
}

fn validate(path: &Path, print: bool) -> anyhow::Result<()> {
    let config = load_config(Some(path))?;
    let rendered = config.to_toml_string()?;
    let factory = ConfigFactory::new(Arc::new(MemoryClusterClient::new()), config)
        .with_context(|| format!("{} is invalid", path.display()))?;
    let (_tx, rx) = watch::channel(false);
    let scheduler = factory
        .create(rx)
        .with_context(|| format!("{} names plugins that cannot be built", path.display()))?;
    info!(
        predicates = scheduler.algorithm().predicates().len(),
        priorities = scheduler.algorithm().priorities().len(),
        "configuration is valid"
    );
    if print {
        println!("{rendered}");
    }
    Ok(())
}

#[derive(Serialize)]
struct SimulationReport {
    bindings: Vec<Binding>,
    unscheduled: Vec<Unscheduled>,
}

#[derive(Serialize)]
struct Unscheduled {
    pod: String,
    /// Last `PodScheduled=False` message, if any attempt finished.
    message: Option<String>,
}

async fn simulate(config: Option<&Path>, cluster: &Path, timeout: Duration) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let fixture = ClusterFixture::from_file(cluster)?;
    let pending = fixture.pending_pods(&config.scheduler_name);

    let client = Arc::new(MemoryClusterClient::new());
    fixture.seed(&client);
    info!(
        nodes = fixture.nodes.len(),
        pods = fixture.pods.len(),
        pending = pending.len(),
        "cluster seeded"
    );

    let grace = config.shutdown_grace();
    let factory = ConfigFactory::new(Arc::clone(&client), config)?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let mut informers = factory.start(shutdown_rx.clone());
    if !informers.wait_for_cache_sync(&mut shutdown_rx).await {
        bail!("informers stopped before the caches synced");
    }
    let scheduler = factory.create(shutdown_rx.clone())?;
    let scheduler_handle = tokio::spawn(async move { scheduler.run().await });

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        if pending.iter().all(|key| is_bound(&client, key)) {
            info!(pods = pending.len(), "all pending pods bound");
            break;
        }
        tokio::select! {
            _ = &mut deadline => {
                warn!(timeout_secs = timeout.as_secs(), "timed out with pods still pending");
                break;
            }
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
    }

    // ── Graceful shutdown ──────────────────────────────────────

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(grace, scheduler_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => bail!("scheduling loop failed: {e}"),
        Err(_) => warn!("scheduling loop did not stop within the grace period"),
    }
    informers.join(grace).await?;

    let report = SimulationReport {
        bindings: client.bindings(),
        unscheduled: pending
            .iter()
            .filter(|key| !is_bound(&client, key))
            .map(|key| Unscheduled {
                pod: key.clone(),
                message: last_failure(&client, key),
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn is_bound(client: &MemoryClusterClient, key: &str) -> bool {
    client.object::<Pod>(key).is_some_and(|p| p.is_assigned())
}

fn last_failure(client: &MemoryClusterClient, key: &str) -> Option<String> {
    client.object::<Pod>(key).and_then(|p| {
        p.status
            .conditions
            .into_iter()
            .find(|c| c.condition_type == PodConditionType::PodScheduled)
            .map(|c| c.message)
    })
}

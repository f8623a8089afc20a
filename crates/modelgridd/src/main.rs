//! modelgridd — the ModelGrid daemon.
//!
//! Single binary that assembles the model deployment control plane:
//! - State store (redb)
//! - Deployment controller (per-model critical sections)
//! - Monitoring & alerting engine
//! - Retrain trigger
//!
//! The API surface, serving processes, and training system are
//! external; they reach the control plane through the collaborator
//! seams wired here.
//!
//! # Usage
//!
//! ```text
//! modelgridd run --data-dir /var/lib/modelgrid --config modelgrid.toml
//! ```

mod collaborators;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use modelgrid_deploy::{DeploymentController, Unconstrained};
use modelgrid_monitor::MonitoringEngine;
use modelgrid_state::StateStore;
use modelgrid_trigger::RetrainTrigger;

use crate::collaborators::{FanoutSink, FsArtifactStore, LogTrainer};
use crate::config::ModelgridConfig;

#[derive(Parser)]
#[command(name = "modelgridd", about = "ModelGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane (single-node, all subsystems in one process).
    Run {
        /// Data directory for persistent state and artifacts.
        #[arg(long, default_value = "/var/lib/modelgrid")]
        data_dir: PathBuf,

        /// Optional modelgrid.toml with policy/threshold overrides.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,modelgridd=debug,modelgrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { data_dir, config } => run(data_dir, config).await,
    }
}

async fn run(data_dir: PathBuf, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match &config_path {
        Some(path) => {
            info!(?path, "loading configuration");
            ModelgridConfig::from_file(path)?
        }
        None => ModelgridConfig::default(),
    };

    std::fs::create_dir_all(&data_dir)?;
    let state = StateStore::open(&data_dir.join("modelgrid.redb"))?;
    let artifacts = Arc::new(FsArtifactStore::new(data_dir.join("artifacts")));

    // Engine first: the controller's transition hook re-attaches it on
    // every live swap, and its sink fans out to the trigger once that
    // exists. Samples for deployments active before startup attach
    // lazily on first ingest.
    let sink = Arc::new(FanoutSink::default());
    let engine = Arc::new(MonitoringEngine::new(
        state.clone(),
        config.monitor_config(),
        sink.clone(),
    ));

    let controller = {
        let engine = engine.clone();
        Arc::new(
            DeploymentController::new(
                state.clone(),
                artifacts,
                Arc::new(Unconstrained),
                config.deploy_policy(),
            )
            .with_transition_hook(Arc::new(move |record: &modelgrid_state::DeploymentRecord| {
                if let Err(e) = engine.attach(record.id) {
                    tracing::error!(error = %e, id = record.id, "failed to attach monitoring");
                }
            })),
        )
    };

    let trigger = Arc::new(RetrainTrigger::new(
        state,
        Arc::new(LogTrainer),
        Arc::clone(&controller),
        config.trigger_policy(),
    ));
    sink.set_trigger(trigger);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(shutdown_rx).await })
    };

    info!(?data_dir, "modelgridd running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    shutdown_tx.send(true)?;
    engine_task.await?;
    Ok(())
}

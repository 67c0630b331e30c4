//! # Job Store Main Entry Point
//!
//! Runs the management API, a worker, or just the migrations.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use jobstore::{
    config::ConfigLoader,
    db::{init_pool, prepare_schema},
    repositories::JobStore,
    server::run_server,
    telemetry::init_tracing,
    worker::Worker,
};

#[derive(Debug, Parser)]
#[command(name = "jobstore", version, about = "Dependency-aware job scheduling store")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the management API (default)
    Serve,
    /// Poll for ready jobs and execute them
    Worker {
        /// Node names this worker serves, overriding JOBSTORE_WORKER_NODES
        #[arg(long, value_delimiter = ',')]
        nodes: Option<Vec<String>>,
    },
    /// Apply migrations and seed the initiator job, then exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;
    init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = init_pool(&config).await?;
    prepare_schema(&db).await?;

    let command = cli.command.unwrap_or(Command::Serve);
    if matches!(command, Command::Migrate) {
        tracing::info!("Schema is up to date");
        return Ok(());
    }

    let store = Arc::new(
        JobStore::new(Arc::new(db))
            .await
            .context("Failed to open the job store")?,
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
        }
        signal_token.cancel();
    });

    match command {
        Command::Serve => run_server(config, store, shutdown).await,
        Command::Worker { nodes } => {
            let mut worker_config = config.worker.clone();
            if let Some(nodes) = nodes {
                worker_config.nodes = nodes;
            }
            Worker::new(store, worker_config).run(shutdown).await;
            Ok(())
        }
        Command::Migrate => Ok(()),
    }
}

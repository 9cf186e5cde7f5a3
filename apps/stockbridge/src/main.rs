//! # Stockbridge
//!
//! Runs sync cycles and serves the sync endpoints for one instance.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  stockbridge.toml + STOCKBRIDGE_* env ──► SyncConfig                    │
//! │                                              │                          │
//! │  --db ──► Database (SQLite, migrations) ─────┤                          │
//! │                                              ▼                          │
//! │                                          SyncAgent                      │
//! │                                              │                          │
//! │           ┌───────────────┬──────────────────┼───────────────┐          │
//! │           ▼               ▼                  ▼               ▼          │
//! │         sync           status             watch            serve        │
//! │     (one phase     (JSON to stdout)    (cycles until    (SyncServer     │
//! │      or both)                           Ctrl-C)          until Ctrl-C)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stockbridge_db::{Database, DbConfig};
use stockbridge_sync::{SyncAgent, SyncConfig, SyncServer};

#[derive(Parser)]
#[command(name = "stockbridge", version, about = "Store-to-cloud sync for Stockbridge POS")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file, overrides `storage.database_path`
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync; pushes only when neither flag is given
    Sync {
        /// Send pending sales and returns
        #[arg(long)]
        push: bool,
        /// Fetch catalog changes
        #[arg(long)]
        pull: bool,
    },
    /// Serve the sync endpoints
    Serve,
    /// Print sync status as JSON
    Status,
    /// Run push then pull on a schedule until Ctrl-C
    Watch {
        /// Seconds between cycles, overrides `schedule.interval_secs`
        #[arg(long)]
        every: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run(Cli::parse()).await {
        error!(error = %e, "stockbridge failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = SyncConfig::load(cli.config).context("loading configuration")?;
    if let Some(db) = cli.db {
        config.storage.database_path = db;
    }

    let db = Database::new(DbConfig::new(&config.storage.database_path))
        .await
        .with_context(|| format!("opening {}", config.storage.database_path.display()))?;

    let agent = SyncAgent::new(config, db.clone())?;

    let result = match cli.command {
        Commands::Sync { push, pull } => sync_once(&agent, push, pull).await,
        Commands::Serve => serve(&agent).await,
        Commands::Status => {
            let status = agent.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Commands::Watch { every } => {
            let every = every
                .map(Duration::from_secs)
                .unwrap_or_else(|| agent.config().interval());
            anyhow::ensure!(!every.is_zero(), "--every must be greater than 0");
            agent.run_scheduled(every, shutdown_signal()).await;
            Ok(())
        }
    };

    db.close().await;
    result
}

/// `sync`: a single phase or a full cycle.
async fn sync_once(agent: &SyncAgent, push: bool, pull: bool) -> anyhow::Result<()> {
    match (push, pull) {
        (true, true) => {
            let report = agent.full_sync().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            anyhow::ensure!(report.push.success && report.pull.success, "sync cycle incomplete");
        }
        (_, true) => {
            let result = agent.pull().await;
            agent.remember(&result).await;
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
        _ => {
            let result = agent.push().await;
            agent.remember(&result).await;
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
    }
    Ok(())
}

/// `serve`: endpoints until Ctrl-C; a configured local instance also syncs on schedule.
async fn serve(agent: &SyncAgent) -> anyhow::Result<()> {
    let handle = SyncServer::new(agent.clone()).start().await?;
    info!(addr = %handle.local_addr(), role = %agent.config().role(), "Serving");

    if agent.config().role().is_local() && agent.config().is_cloud_configured() {
        agent
            .run_scheduled(agent.config().interval(), shutdown_signal())
            .await;
    } else {
        shutdown_signal().await;
    }

    handle.shutdown().await?;
    info!("Server shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber.
///
/// `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stockbridge=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

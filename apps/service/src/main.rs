//! # linkwatch
//!
//! Connectivity health monitor: pings a fixed set of targets on a steady
//! cadence and records reachability and round-trip times.
//!
//! ## Usage
//! ```bash
//! # Poll forever with the default config (~/.config/linkwatch/config.toml)
//! linkwatch run
//!
//! # Validate and print a config
//! linkwatch --config ./linkwatch.toml check-config
//!
//! # One-off probe through the configured ping settings
//! linkwatch probe 8.8.8.8
//!
//! # Last stored results of every configured target
//! linkwatch history --limit 5
//! ```

mod config;
mod database;
mod monitoring;
mod orchestrator;
mod pool;
mod registry;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use config::{Config, validate_target_address};
use monitoring::{Prober, SystemPing};
use orchestrator::Orchestrator;

#[derive(Parser)]
#[command(name = "linkwatch", about = "Connectivity health monitor", version, author)]
struct Cli {
    /// Path to the TOML configuration file, created with defaults if missing.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe all targets until interrupted.
    Run {
        /// Stop after this many cycles instead of running until interrupted.
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Load, validate and print the configuration.
    CheckConfig,

    /// Probe a single address once and print the outcome.
    Probe {
        /// IP address or hostname.
        address: String,
    },

    /// Print the most recent stored results of every configured target.
    History {
        /// Results to show per target.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = Config::resolve_path(cli.config.as_ref())?;
    let created = !config_path.exists();
    let config = Config::from_config(Some(&config_path)).context("Failed to load configuration")?;

    let _guard = logger::init_with(&config.log.settings()?)?;
    if created {
        info!("No config found, wrote defaults to {}", config_path.display());
    }

    match cli.command {
        Commands::Run { cycles } => run(config, cycles).await,
        Commands::CheckConfig => {
            println!("{config}");
            Ok(())
        }
        Commands::Probe { address } => probe(&config, &address).await,
        Commands::History { limit } => history(&config, limit).await,
    }
}

async fn run(config: Config, cycles: Option<u64>) -> Result<()> {
    info!("Starting {} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match cycles {
        Some(cycles) => {
            let mut orchestrator = Orchestrator::new(config).await?;
            orchestrator.run_cycles(cycles).await;
            Ok(())
        }
        None => {
            // Listen right away so a signal during startup or the first cycle is not lost
            let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = stop_tx.send(());
            });
            Orchestrator::start(config, async {
                let _ = stop_rx.await;
            })
            .await
        }
    }
}

async fn probe(config: &Config, address: &str) -> Result<()> {
    if let Err(reason) = validate_target_address(address) {
        bail!("Refusing to probe {address:?}: {reason}");
    }

    let facility = SystemPing::new(config.probe.program.clone());
    let prober = Prober::new(std::sync::Arc::new(facility), config.probe.attempts, config.probe.timeout());

    let outcome = prober.probe(address).await;
    println!("{address}: {outcome}");
    if !outcome.succeeded() {
        bail!("{address} is unreachable");
    }
    Ok(())
}

async fn history(config: &Config, limit: usize) -> Result<()> {
    let storage = orchestrator::open_storage(config).await?;

    for (target, results) in orchestrator::history(storage, &config.targets, limit).await? {
        println!(
            "{} ({}) {}, tracked since {}, alias set {}",
            target.alias,
            target.address,
            target.id,
            target.created_at.format("%Y-%m-%d %H:%M:%S"),
            target.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
        if results.is_empty() {
            println!("  no results yet");
        }
        for result in results {
            println!("  {result}");
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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

//! CLI entry point for dr-logger.
//!
//! Provides a command-line interface for:
//! - Running the polling daemon against the configured rigs
//! - Validating a configuration file without starting anything
//!
//! # Usage
//!
//! Run the daemon:
//! ```bash
//! dr-logger run --config config/dr-logger.toml
//! ```
//!
//! Validate a configuration file:
//! ```bash
//! dr-logger check-config --config config/dr-logger.toml
//! ```

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use dr_logger::config::Config;
use dr_logger::logging;
use dr_logger::session::{discover_sessions_builtin, Session};
use dr_logger::source::sim::{SimDiodeSource, SimGaugeSource, SimHub, SimThermometerSource};
use dr_logger::source::SourceHub;
use dr_logger::store::{CsvStore, DatasetStore, MemoryStore};
use mimalloc::MiMalloc;
use std::path::PathBuf;
use std::sync::Arc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "dr-logger")]
#[command(about = "Periodic instrument logger for dilution refrigerators", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the polling daemon
    Run {
        /// Path to the configuration file
        #[arg(long, default_value = "config/dr-logger.toml")]
        config: PathBuf,
    },

    /// Validate a configuration file and exit
    CheckConfig {
        /// Path to the configuration file
        #[arg(long, default_value = "config/dr-logger.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config).await,
        Commands::CheckConfig { config } => check_config(config),
    }
}

fn load(path: &PathBuf) -> Result<Config> {
    let config = Config::load_from(path)?;
    config.validate().map_err(|e| anyhow!(e))?;
    Ok(config)
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = load(&path)?;
    println!("{} is valid: {} rig(s) configured", path.display(), config.rigs.len());
    Ok(())
}

async fn run(path: PathBuf) -> Result<()> {
    let config = load(&path)?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;
    tracing::info!(application = %config.application.name, "Starting");

    let store: Arc<dyn DatasetStore> = match config.storage.backend.as_str() {
        "csv" => Arc::new(CsvStore::new(config.storage.root_dir.clone())),
        _ => Arc::new(MemoryStore::new()),
    };
    let hub = demo_hub();

    let sessions = discover_sessions_builtin(&config, &hub, &store);
    if sessions.is_empty() {
        tracing::warn!("No rigs could be instantiated; nothing to do");
        return Ok(());
    }
    for session in &sessions {
        session.logging(true).await;
    }
    tracing::info!(sessions = sessions.len(), "Logging; press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    for session in sessions {
        shutdown(session).await;
    }
    Ok(())
}

async fn shutdown(session: Session) {
    tracing::info!(session = %session.name(), "Stopping session");
    session.shutdown().await;
}

/// In-process simulated instrument sources, standing in for a hardware
/// connection hub.
fn demo_hub() -> Arc<dyn SourceHub> {
    let hub = Arc::new(SimHub::new());
    hub.add_gauge_set(Arc::new(SimGaugeSource::new(
        "mks_gauge_server",
        &[
            ("Still", "Torr", 1.2e-3),
            ("OVC", "Torr", 3.0e-6),
            ("He Flow", "Torr", 0.8),
        ],
    )));
    hub.add_diode_array(Arc::new(SimDiodeSource::new(
        "lakeshore_diodes",
        &[4.2, 4.5, 77.0, 3.0, 0.1, 0.8, 0.7, 1.5],
    )));
    hub.add_thermometer_array(Arc::new(SimThermometerSource::new(
        "lakeshore_ruox",
        &[("MC", 0.015, 2100.0), ("Still", 0.7, 310.0)],
    )));
    hub
}

//! Training Sentinel CLI
//!
//! Operator tool for inspecting checkpoints, validating their integrity,
//! and reviewing recent anomaly alerts. Works directly against the plain
//! file layout the sentinel writes; no running process required.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{alerts, checkpoints, validate};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Training Sentinel CLI
#[derive(Parser)]
#[command(name = "sentinel")]
#[command(author, version, about = "CLI for Training Sentinel", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List known checkpoints
    List {
        /// Checkpoint directory (can also be set via SENTINEL_CHECKPOINT_DIR)
        #[arg(long, short)]
        dir: Option<String>,
    },

    /// Validate a checkpoint file for integrity and completeness
    Validate {
        /// Path to the checkpoint file
        path: String,
    },

    /// Show recent anomaly alerts
    Alerts {
        /// Alert log file (can also be set via SENTINEL_ALERT_LOG)
        #[arg(long, short)]
        log: Option<String>,

        /// Only show alerts from the last N hours
        #[arg(long, default_value_t = 24)]
        since_hours: i64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
            .with(fmt::layer())
            .init();
    }

    let config = config::CliConfig::load()?;

    match cli.command {
        Commands::List { dir } => {
            checkpoints::list(&dir.unwrap_or(config.checkpoint_dir), cli.format)
        }
        Commands::Validate { path } => validate::run(&path, cli.format),
        Commands::Alerts { log, since_hours } => {
            alerts::show(&log.unwrap_or(config.alert_log), since_hours, cli.format)
        }
    }
}

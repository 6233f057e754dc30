//! Tracker CLI - queue payloads and push them to the collection endpoint.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracker_config_and_utils::{init_logging, init_logging_to_file, Config, Paths};

/// Tracker command-line interface.
#[derive(Parser)]
#[command(name = "tracker")]
#[command(about = "Durable batching and delivery of tracking payloads")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (database, logs, config). Defaults to ~/.tracker
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Collection endpoint, overriding the configuration
    #[arg(long, global = true, env = "TRACKER_ENDPOINT_URL")]
    endpoint: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue JSON payloads (one object per line) and deliver them
    Send {
        /// Read payloads from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Event name used for duplicate-account rules; defaults to each payload's "event" field
        #[arg(short, long)]
        event: Option<String>,
    },
    /// Deliver everything still queued
    Flush,
    /// Show queue and configuration status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;
    if let Some(endpoint) = cli.endpoint {
        config.endpoint_url = Some(endpoint);
    }

    let level = cli.log_level.unwrap_or_else(|| config.log_level.clone());
    if let Err(e) = init_logging_to_file(&level, &paths) {
        init_logging(&level);
        tracing::warn!(error = %e, "File logging unavailable, logging to stderr only");
    }

    match cli.command {
        Commands::Send { file, event } => commands::send(&config, &paths, file, event).await?,
        Commands::Flush => commands::flush(&config, &paths).await?,
        Commands::Status => commands::status(&config, &paths).await?,
    }

    Ok(())
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use palace::{cli, config, server};

#[derive(Parser)]
#[command(
    name = "palace",
    version,
    about = "Code intelligence and knowledge memory for coding agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the JSON-RPC server (stdio unless configured or told otherwise)
    Serve {
        /// Listen on this Unix socket instead of stdio
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Index the workspace, or one file or directory below it
    Scan { path: Option<String> },
    /// Show index and memory statistics
    Stats,
    /// Check database health
    Doctor,
    /// Manage the local embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to embedding.cache_dir
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::PalaceConfig::load()?;

    // stderr only: stdout carries JSON-RPC in stdio mode.
    let filter =
        EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { socket } => server::serve(config, socket).await?,
        Command::Scan { path } => cli::scan::scan(&config, path.as_deref()).await?,
        Command::Stats => cli::stats::stats(&config)?,
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await?,
        },
    }

    Ok(())
}

//! Reel CLI - Command-line interface
//!
//! Synthesizes, inspects and transcodes reel containers through the
//! simulated media backend.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use reel_core::tracing_setup::{Verbosity, init_tracing};

#[derive(Parser)]
#[command(name = "reel")]
#[command(about = "Track-level media transcoder")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level
    #[arg(long, value_enum, default_value_t = Verbosity::Info, global = true)]
    log_level: Verbosity,

    /// Directory for the full trace log
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level, cli.log_dir.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    commands::handle_command(cli.command).await
}

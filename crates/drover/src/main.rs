//! Drover - distributed CI workflow engine
//!
//! Main entry point for the drover CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;

mod commands;

use commands::{agent, cancel, server, status, submit};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Drover - distributed CI workflow engine
#[derive(Parser)]
#[command(name = "drover")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file to use instead of discovery
    #[arg(short, long, global = true, env = "DROVER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler server
    Server(server::ServerArgs),

    /// Run an agent that executes workflows
    Agent(agent::AgentArgs),

    /// Queue a workflow described as JSON
    Submit(submit::SubmitArgs),

    /// Cancel a queued or running workflow
    Cancel(cancel::CancelArgs),

    /// Show server status or the state of one workflow
    Status(status::StatusArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, warnings) = match &cli.config {
        Some(path) => (drover_config::load_config_file(path)?, Vec::new()),
        None => {
            let loaded = drover_config::load_config(None)?;
            (loaded.config, loaded.warnings)
        }
    };

    config.validate()?;

    let _guard = init_tracing(cli.verbose, &config.logging());
    for warning in warnings {
        warn!("{}", warning);
    }

    let ctx = commands::Context {
        config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Server(args) => server::run(args, &ctx).await,
        Commands::Agent(args) => agent::run(args, &ctx).await,
        Commands::Submit(args) => submit::run(args, &ctx).await,
        Commands::Cancel(args) => cancel::run(args, &ctx).await,
        Commands::Status(args) => status::run(args, &ctx).await,
    }
}

/// Console (human-readable) plus an optional daily-rotated JSON file.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing(
    verbose: bool,
    logging: &drover_config::LoggingConfig,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let default_filter = if verbose {
        "drover=debug,drover_agent=debug,drover_client=debug,drover_pipeline=debug,drover_server=debug,drover_config=debug,info"
    } else {
        "drover=info,drover_agent=info,drover_client=info,drover_pipeline=info,drover_server=info,warn"
    };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(console_filter);

    let (file, guard) = if logging.file {
        let log_dir = logging
            .dir
            .clone()
            .or_else(|| drover_config::xdg_config_dir().map(|d| d.join("logs")))
            .unwrap_or_else(|| PathBuf::from("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "drover.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new(
                "drover=trace,drover_agent=trace,drover_client=debug,drover_pipeline=trace,drover_server=debug,drover_config=debug,info",
            ));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry().with(console).with(file).init();
    guard
}

//! Server command - runs the scheduler.

use anyhow::{Context as _, Result};
use clap::Args;
use drover_server::{Server, ServerConfig};
use tokio::net::TcpListener;
use tracing::info;

use super::{Context, shutdown_token};

/// Arguments for the server command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Bearer token agents must present (or set DROVER_TOKEN)
    #[arg(long, env = "DROVER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Workflow lease in seconds (overrides config)
    #[arg(long)]
    pub lease_secs: Option<u64>,
}

/// Run the server command.
pub async fn run(args: ServerArgs, ctx: &Context) -> Result<()> {
    let mut file = ctx.config.server();
    if let Some(port) = args.port {
        file.port = port;
    }
    if let Some(bind) = args.bind {
        file.bind = bind;
    }
    if let Some(token) = args.token {
        file.token = Some(token);
    }
    if let Some(lease) = args.lease_secs {
        file.lease_secs = lease;
    }

    let config = ServerConfig::try_from(&file)?;
    if config.auth_token.is_none() {
        tracing::warn!("No token configured, the API is open to anyone who can reach it");
    }
    let addr = config.bind_address;
    info!(
        %addr,
        lease_secs = config.lease.as_secs(),
        long_poll_secs = config.long_poll.as_secs(),
        "Starting drover server"
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    Server::new(config).serve(listener, shutdown_token()).await?;
    Ok(())
}

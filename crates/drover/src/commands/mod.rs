//! CLI command handlers.

pub mod agent;
pub mod cancel;
pub mod server;
pub mod status;
pub mod submit;

use std::collections::HashMap;

use anyhow::{Context as _, Result};
use clap::Args;
use drover_client::DroverClient;
use drover_config::DroverConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged file configuration.
    pub config: DroverConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

/// Where to reach the server; falls back to the `[agent]` section.
#[derive(Args, Debug, Clone, Default)]
pub struct ServerConnection {
    /// Server URL (overrides config)
    #[arg(long, env = "DROVER_SERVER")]
    pub server: Option<String>,

    /// Bearer token (or set DROVER_TOKEN)
    #[arg(long, env = "DROVER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

impl ServerConnection {
    pub fn url(&self, ctx: &Context) -> String {
        self.server
            .clone()
            .unwrap_or_else(|| ctx.config.agent().server)
    }

    pub fn client(&self, ctx: &Context) -> Result<DroverClient> {
        let url = self.url(ctx);
        let mut builder = DroverClient::builder().base_url(&url);
        if let Some(token) = self.token.clone().or_else(|| ctx.config.agent().token) {
            builder = builder.auth_token(token);
        }
        builder
            .build()
            .with_context(|| format!("invalid server URL '{url}'"))
    }
}

/// Parse a `key=value` label.
pub fn parse_label(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

pub fn labels(pairs: &[(String, String)]) -> HashMap<String, String> {
    pairs.iter().cloned().collect()
}

/// Token cancelled on ctrl-c or SIGTERM.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown requested");
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

//! Agent command - polls the server and runs workflows.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use drover_agent::{Agent, AgentConfig, backend, open_store};
use tracing::info;

use super::{Context, ServerConnection, parse_label, shutdown_token};

/// Arguments for the agent command.
#[derive(Args, Debug)]
pub struct AgentArgs {
    #[command(flatten)]
    pub connection: ServerConnection,

    /// Concurrent workflows (overrides config)
    #[arg(long)]
    pub capacity: Option<u32>,

    /// Execution backend (overrides config)
    #[arg(long)]
    pub backend: Option<String>,

    /// Workspace root for the local backend (overrides config)
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Hostname reported to the server (overrides config)
    #[arg(long)]
    pub hostname: Option<String>,

    /// Filter label, repeatable (key=value)
    #[arg(short, long = "label", value_parser = parse_label)]
    pub labels: Vec<(String, String)>,

    /// Enable crash recovery (overrides config)
    #[arg(long)]
    pub recovery: bool,
}

/// Run the agent command.
pub async fn run(args: AgentArgs, ctx: &Context) -> Result<()> {
    let mut file = ctx.config.agent();
    if let Some(capacity) = args.capacity {
        file.capacity = capacity;
    }
    if let Some(backend) = args.backend {
        file.backend = backend;
    }
    if let Some(workdir) = args.workdir {
        file.workdir = Some(workdir);
    }
    if let Some(hostname) = args.hostname {
        file.hostname = Some(hostname);
    }
    file.labels.extend(args.labels);

    let mut recovery = ctx.config.recovery();
    recovery.enabled |= args.recovery;

    let engine = backend::create(&file.backend, &file.resolved_workdir())
        .with_context(|| format!("available backends: {}", backend::BACKENDS.join(", ")))?;
    let store = open_store(&recovery).await?;
    let client = args.connection.client(ctx)?;
    info!(server = %client.base_url(), backend = %file.backend, "Starting drover agent");

    let mut builder = Agent::builder(Arc::new(client), engine)
        .with_config(AgentConfig::from_file(&file, &recovery));
    if let Some(store) = store {
        builder = builder.with_store(store);
    }
    builder.build().run(shutdown_token()).await?;
    Ok(())
}

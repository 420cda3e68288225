//! Status command - server health, or the state of one workflow.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use drover_types::{WorkflowInfo, WorkflowStatus};
use serde::Serialize;

use super::{Context, ServerConnection};

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Workflow id; omit for server status
    pub id: Option<String>,

    /// Print the workflow's log lines
    #[arg(long)]
    pub logs: bool,

    #[command(flatten)]
    pub connection: ServerConnection,
}

/// Server status for JSON output.
#[derive(Debug, Serialize)]
struct StatusOutput {
    running: bool,
    version: Option<String>,
    protocol_version: Option<u32>,
    server_url: String,
}

/// Run the status command.
pub async fn run(args: StatusArgs, ctx: &Context) -> Result<()> {
    match &args.id {
        Some(id) => workflow_status(id, &args, ctx).await,
        None => server_status(&args, ctx).await,
    }
}

async fn server_status(args: &StatusArgs, ctx: &Context) -> Result<()> {
    let client = args.connection.client(ctx)?;
    let server_url = args.connection.url(ctx);
    let health = client.health().check().await;
    let version = client.health().version().await.ok();

    if ctx.json_output {
        let output = StatusOutput {
            running: health.is_ok(),
            version: health.as_ref().ok().map(|h| h.version.clone()),
            protocol_version: version.map(|v| v.protocol_version),
            server_url,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    println!("{}", style("Drover Server Status").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();
    match health {
        Ok(health) => {
            println!(
                "  {} {}",
                dim.apply_to("Status:"),
                Style::new().green().apply_to("● running")
            );
            println!("  {} {}", dim.apply_to("Version:"), health.version);
            if let Some(version) = version {
                println!("  {} {}", dim.apply_to("Protocol:"), version.protocol_version);
            }
            println!("  {} {}", dim.apply_to("Server:"), server_url);
        }
        Err(e) => {
            println!(
                "  {} {}",
                dim.apply_to("Status:"),
                Style::new().red().apply_to("● not reachable")
            );
            println!("  {} {}", dim.apply_to("Server:"), server_url);
            if ctx.verbose {
                println!();
                println!("  {} {}", dim.apply_to("Error:"), e);
            }
            println!();
            println!("  {}", dim.apply_to("Start the server with: drover server"));
        }
    }
    println!();
    Ok(())
}

async fn workflow_status(id: &str, args: &StatusArgs, ctx: &Context) -> Result<()> {
    let client = args.connection.client(ctx)?;
    let info = client.workflows().get(id).await?;
    let logs = if args.logs {
        client.workflows().logs(id).await?
    } else {
        Vec::new()
    };

    if ctx.json_output {
        let mut value = serde_json::to_value(&info)?;
        if args.logs {
            value["logs"] = serde_json::to_value(&logs)?;
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    print_workflow(&info);
    if !logs.is_empty() {
        let dim = Style::new().dim();
        println!("{}", dim.apply_to("─".repeat(40)));
        for entry in &logs {
            let step = step_name(&info, &entry.step_uuid);
            println!("  {} {}", dim.apply_to(format!("[{step}]")), entry.data);
        }
        println!();
    }
    Ok(())
}

fn print_workflow(info: &WorkflowInfo) {
    let dim = Style::new().dim();
    println!();
    println!(
        "{} {}",
        style("Workflow").bold(),
        style(&info.workflow.id).bold()
    );
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("  {} {}", dim.apply_to("Status:"), status_label(info.status));
    if let Some(agent) = info.agent_id {
        println!("  {} {}", dim.apply_to("Agent:"), agent);
    }
    if let Some(error) = &info.state.error {
        println!("  {} {}", dim.apply_to("Error:"), error);
    }
    if info.requeues > 0 {
        println!("  {} {}", dim.apply_to("Requeues:"), info.requeues);
    }
    println!("  {} {}", dim.apply_to("Log lines:"), info.log_lines);

    println!();
    for stage in &info.workflow.config.stages {
        println!("  {}", style(&stage.name).bold());
        for step in &stage.steps {
            let state = info.steps.iter().find(|s| s.step_uuid == step.uuid);
            let marker = match state {
                Some(s) if s.canceled => Style::new().yellow().apply_to("■"),
                Some(s) if s.is_finished() && s.exit_code == 0 && s.error.is_none() => {
                    Style::new().green().apply_to("✓")
                }
                Some(s) if s.is_finished() => Style::new().red().apply_to("✗"),
                Some(_) => Style::new().cyan().apply_to("●"),
                None => dim.apply_to("○"),
            };
            let code = state
                .filter(|s| s.is_finished() && s.exited)
                .map(|s| format!(" (exit {})", s.exit_code))
                .unwrap_or_default();
            println!("    {} {}{}", marker, step.name, dim.apply_to(code));
        }
    }
    println!();
}

fn status_label(status: WorkflowStatus) -> console::StyledObject<&'static str> {
    match status {
        WorkflowStatus::Queued => Style::new().dim().apply_to("queued"),
        WorkflowStatus::Running => Style::new().cyan().apply_to("running"),
        WorkflowStatus::Success => Style::new().green().apply_to("success"),
        WorkflowStatus::Failure => Style::new().red().apply_to("failure"),
        WorkflowStatus::Canceled => Style::new().yellow().apply_to("canceled"),
    }
}

fn step_name<'a>(info: &'a WorkflowInfo, uuid: &str) -> &'a str {
    info.workflow
        .config
        .steps()
        .find(|s| s.uuid == uuid)
        .map(|s| s.name.as_str())
        .unwrap_or("?")
}

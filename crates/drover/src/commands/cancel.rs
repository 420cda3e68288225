//! Cancel command.

use anyhow::Result;
use clap::Args;
use console::Style;

use super::{Context, ServerConnection};

/// Arguments for the cancel command.
#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Workflow id
    pub id: String,

    #[command(flatten)]
    pub connection: ServerConnection,
}

/// Run the cancel command.
pub async fn run(args: CancelArgs, ctx: &Context) -> Result<()> {
    let client = args.connection.client(ctx)?;
    client.workflows().cancel(&args.id).await?;

    if ctx.json_output {
        println!("{}", serde_json::json!({ "id": args.id, "canceled": true }));
    } else {
        println!("{} canceled {}", Style::new().yellow().apply_to("■"), args.id);
    }
    Ok(())
}

//! Submit command - queues a workflow.

use std::path::PathBuf;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use console::Style;
use drover_types::SubmitRequest;
use serde::Serialize;

use super::{Context, ServerConnection, labels, parse_label};

/// Arguments for the submit command.
#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Workflow file: `{"id"?, "config": {"stages": [...]}, "timeout"?}`
    pub file: PathBuf,

    /// Label an agent must carry, repeatable (key=value)
    #[arg(short, long = "label", value_parser = parse_label)]
    pub labels: Vec<(String, String)>,

    /// Workflow id (overrides the file)
    #[arg(long)]
    pub id: Option<String>,

    #[command(flatten)]
    pub connection: ServerConnection,
}

#[derive(Debug, Serialize)]
struct SubmitOutput<'a> {
    id: &'a str,
    stages: usize,
}

/// Read and validate a workflow file.
pub fn load_request(args: &SubmitArgs) -> Result<SubmitRequest> {
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let mut request: SubmitRequest = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a valid workflow", args.file.display()))?;

    if request.config.stages.is_empty() {
        bail!("{} has no stages", args.file.display());
    }
    if let Some(id) = &args.id {
        request.id = Some(id.clone());
    }
    request.labels.extend(labels(&args.labels));
    Ok(request)
}

/// Run the submit command.
pub async fn run(args: SubmitArgs, ctx: &Context) -> Result<()> {
    let request = load_request(&args)?;
    let client = args.connection.client(ctx)?;
    let response = client.workflows().submit(&request).await?;

    if ctx.json_output {
        let output = SubmitOutput {
            id: &response.id,
            stages: request.config.stages.len(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let green = Style::new().green();
        println!(
            "{} queued workflow {} ({} stages)",
            green.apply_to("✓"),
            Style::new().bold().apply_to(&response.id),
            request.config.stages.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(file: PathBuf) -> SubmitArgs {
        SubmitArgs {
            file,
            labels: vec![("arch".into(), "arm64".into())],
            id: None,
            connection: ServerConnection::default(),
        }
    }

    #[test]
    fn test_load_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.json");
        std::fs::write(
            &path,
            r#"{"id":"build-1","timeout":600,"labels":{"os":"linux"},
                "config":{"stages":[{"name":"build","steps":[{"name":"compile","image":"rust"}]}]}}"#,
        )
        .unwrap();

        let request = load_request(&args(path)).unwrap();
        assert_eq!(request.id.as_deref(), Some("build-1"));
        assert_eq!(request.timeout, 600);
        assert_eq!(request.labels["os"], "linux");
        assert_eq!(request.labels["arch"], "arm64");
        assert_eq!(request.config.stages[0].steps[0].name, "compile");
    }

    #[test]
    fn test_rejects_empty_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.json");
        std::fs::write(&path, r#"{"config":{"stages":[]}}"#).unwrap();
        assert!(load_request(&args(path)).unwrap_err().to_string().contains("no stages"));
    }
}

//! Admin workflows API.

use drover_types::{LogEntry, SubmitRequest, SubmitResponse, WorkflowInfo};

use crate::client::DroverClient;
use crate::error::Result;

/// Submit, cancel and inspect workflows.
pub struct WorkflowsApi {
    client: DroverClient,
}

impl WorkflowsApi {
    pub(crate) fn new(client: DroverClient) -> Self {
        Self { client }
    }

    /// Queue a workflow.
    pub async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse> {
        let url = self.client.url("queue")?;
        self.client.post(url, request).await
    }

    /// Cancel a queued or running workflow.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let url = self.client.workflow_url(id, Some("cancel"))?;
        self.client.post_empty::<()>(url, None).await
    }

    pub async fn get(&self, id: &str) -> Result<WorkflowInfo> {
        let url = self.client.workflow_url(id, None)?;
        self.client.get(url).await
    }

    /// Log lines received so far.
    pub async fn logs(&self, id: &str) -> Result<Vec<LogEntry>> {
        let url = self.client.workflow_url(id, Some("logs"))?;
        self.client.get(url).await
    }
}

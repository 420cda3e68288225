//! [`Peer`] over HTTP.

use async_trait::async_trait;
use drover_types::{
    AgentInfo, Filter, LogEntry, Peer, PeerError, RegisterResponse, Result, StepState, Version,
    WaitResponse, Workflow, WorkflowState,
};
use reqwest::StatusCode;
use tracing::debug;

use crate::client::DroverClient;
use crate::error::Error;

#[async_trait]
impl Peer for DroverClient {
    async fn version(&self) -> Result<Version> {
        Ok(self.health().version().await?)
    }

    async fn next(&self, filter: &Filter) -> Result<Option<Workflow>> {
        let url = self.url("next")?;
        let request = self.http().post(url).json(filter);
        let response = self.send(request, self.long_poll_timeout()).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let workflow = response.json().await.map_err(Error::from)?;
        Ok(Some(workflow))
    }

    async fn init(&self, workflow_id: &str, state: WorkflowState) -> Result<()> {
        let url = self
            .workflow_url(workflow_id, Some("init"))
            .map_err(PeerError::from)?;
        self.post_empty(url, Some(&state))
            .await
            .map_err(|e| e.into_peer(workflow_id))
    }

    async fn wait(&self, workflow_id: &str) -> Result<bool> {
        let url = self
            .workflow_url(workflow_id, Some("wait"))
            .map_err(PeerError::from)?;
        loop {
            let request = self.http().get(url.clone());
            let response = self
                .send(request, self.long_poll_timeout())
                .await
                .map_err(|e| e.into_peer(workflow_id))?;
            if response.status() == StatusCode::NO_CONTENT {
                debug!(workflow_id, "Wait window elapsed, polling again");
                continue;
            }
            let wait: WaitResponse = response.json().await.map_err(Error::from)?;
            return Ok(wait.canceled);
        }
    }

    async fn done(&self, workflow_id: &str, state: WorkflowState) -> Result<()> {
        let url = self
            .workflow_url(workflow_id, Some("done"))
            .map_err(PeerError::from)?;
        self.post_empty(url, Some(&state))
            .await
            .map_err(|e| e.into_peer(workflow_id))
    }

    async fn extend(&self, workflow_id: &str) -> Result<()> {
        let url = self
            .workflow_url(workflow_id, Some("extend"))
            .map_err(PeerError::from)?;
        self.post_empty::<()>(url, None)
            .await
            .map_err(|e| e.into_peer(workflow_id))
    }

    async fn update(&self, workflow_id: &str, state: StepState) -> Result<()> {
        let url = self
            .workflow_url(workflow_id, Some("steps"))
            .map_err(PeerError::from)?;
        self.post_empty(url, Some(&state))
            .await
            .map_err(|e| e.into_peer(workflow_id))
    }

    fn enqueue_log(&self, entry: LogEntry) {
        self.ship_log(entry);
    }

    async fn register_agent(&self, info: AgentInfo) -> Result<i64> {
        let url = self.url("agents")?;
        let registered: RegisterResponse = self.post(url, &info).await?;
        self.set_agent_id(Some(registered.agent_id));
        Ok(registered.agent_id)
    }

    async fn unregister_agent(&self) -> Result<()> {
        if self.agent_id().is_none() {
            return Ok(());
        }
        let url = self.url("agents/self")?;
        self.delete(url).await?;
        self.set_agent_id(None);
        Ok(())
    }

    async fn report_health(&self) -> Result<()> {
        let url = self.url("agents/self/health")?;
        Ok(self.post_empty::<()>(url, None).await?)
    }
}

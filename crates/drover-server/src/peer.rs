//! In-process [`Peer`] over a shared [`Hub`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drover_config::defaults;
use drover_types::{
    AgentInfo, Filter, LogEntry, Peer, PeerError, Result, StepState, Version, Workflow,
    WorkflowState,
};
use parking_lot::Mutex;

use crate::hub::Hub;

/// A peer that calls the hub directly, for single-process mode and tests.
pub struct LocalPeer {
    hub: Arc<Hub>,
    agent_id: Mutex<Option<i64>>,
    long_poll: Duration,
}

impl LocalPeer {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            agent_id: Mutex::new(None),
            long_poll: Duration::from_secs(defaults::LONG_POLL_SECS),
        }
    }

    /// How long one `next` call blocks before returning `None`.
    pub fn with_long_poll(mut self, window: Duration) -> Self {
        self.long_poll = window;
        self
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn agent_id(&self) -> Option<i64> {
        *self.agent_id.lock()
    }
}

#[async_trait]
impl Peer for LocalPeer {
    async fn version(&self) -> Result<Version> {
        Ok(Version::current())
    }

    async fn next(&self, filter: &Filter) -> Result<Option<Workflow>> {
        self.hub.next(self.agent_id(), filter, self.long_poll).await
    }

    async fn init(&self, workflow_id: &str, state: WorkflowState) -> Result<()> {
        self.hub.init(workflow_id, self.agent_id(), state)
    }

    async fn wait(&self, workflow_id: &str) -> Result<bool> {
        loop {
            if let Some(canceled) = self.hub.wait(workflow_id, self.long_poll).await? {
                return Ok(canceled);
            }
        }
    }

    async fn done(&self, workflow_id: &str, state: WorkflowState) -> Result<()> {
        self.hub.done(workflow_id, self.agent_id(), state)
    }

    async fn extend(&self, workflow_id: &str) -> Result<()> {
        self.hub.extend(workflow_id, self.agent_id())
    }

    async fn update(&self, workflow_id: &str, state: StepState) -> Result<()> {
        self.hub.update(workflow_id, self.agent_id(), state)
    }

    fn enqueue_log(&self, entry: LogEntry) {
        self.hub.append_logs(vec![entry]);
    }

    async fn register_agent(&self, info: AgentInfo) -> Result<i64> {
        let id = self.hub.register_agent(info);
        *self.agent_id.lock() = Some(id);
        Ok(id)
    }

    async fn unregister_agent(&self) -> Result<()> {
        let id = self.agent_id.lock().take();
        if let Some(id) = id {
            self.hub.unregister_agent(id);
        }
        Ok(())
    }

    async fn report_health(&self) -> Result<()> {
        match self.agent_id() {
            Some(id) => self.hub.report_health(id),
            None => Err(PeerError::Rejected("agent is not registered".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_types::{Config, Stage, Step, SubmitRequest};

    #[tokio::test]
    async fn test_full_protocol_round() {
        let hub = Arc::new(Hub::new(Duration::from_secs(60), Duration::from_secs(60)));
        let peer = LocalPeer::new(hub.clone()).with_long_poll(Duration::from_millis(20));

        assert!(peer.report_health().await.is_err());
        let agent = peer.register_agent(AgentInfo::default()).await.unwrap();
        peer.report_health().await.unwrap();

        hub.submit(SubmitRequest {
            id: Some("w".into()),
            config: Config::new(vec![Stage::new("s", vec![Step::new("a", "img")])]),
            ..Default::default()
        })
        .unwrap();

        let workflow = peer.next(&Filter::default()).await.unwrap().unwrap();
        assert_eq!(hub.info(&workflow.id).unwrap().agent_id, Some(agent));

        peer.init("w", WorkflowState::default()).await.unwrap();
        peer.extend("w").await.unwrap();
        peer.done("w", WorkflowState::default()).await.unwrap();
        assert!(!peer.wait("w").await.unwrap());

        peer.unregister_agent().await.unwrap();
        assert!(hub.agents().is_empty());
    }
}

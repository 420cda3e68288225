//! The agent ↔ server contract.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::rpc::{AgentInfo, LogEntry, StepState, Version, WorkflowState};
use crate::workflow::{Filter, Workflow};

/// Bidirectional channel between an agent process and the server.
///
/// One peer serves every workflow running on an agent concurrently, so each
/// workflow-scoped method takes the workflow id explicitly. Implementations
/// keep no mutable state shared between workflows beyond the connection and
/// the agent identity assigned by [`Peer::register_agent`].
///
/// Blocking calls (`next`, `wait`) are cancelled by dropping their future.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Capability negotiation.
    async fn version(&self) -> Result<Version>;

    /// Block until a workflow matching `filter` is available.
    ///
    /// Returns `None` if the server's long-poll window ends without work; the
    /// caller simply asks again.
    async fn next(&self, filter: &Filter) -> Result<Option<Workflow>>;

    /// Announce that execution of `workflow_id` is starting.
    async fn init(&self, workflow_id: &str, state: WorkflowState) -> Result<()>;

    /// Block until the workflow finishes or the server cancels it.
    ///
    /// Returns `true` iff the server canceled the workflow.
    async fn wait(&self, workflow_id: &str) -> Result<bool>;

    /// Report the terminal state of the workflow. Sent exactly once.
    async fn done(&self, workflow_id: &str, state: WorkflowState) -> Result<()>;

    /// Renew the server-side deadline for a running workflow.
    async fn extend(&self, workflow_id: &str) -> Result<()>;

    /// Report a step's started or finished state.
    async fn update(&self, workflow_id: &str, state: StepState) -> Result<()>;

    /// Queue a log line for delivery. Best effort; never blocks.
    fn enqueue_log(&self, entry: LogEntry);

    /// Register this agent; returns the server-assigned agent id.
    async fn register_agent(&self, info: AgentInfo) -> Result<i64>;

    async fn unregister_agent(&self) -> Result<()>;

    async fn report_health(&self) -> Result<()>;
}

/// Shared, dynamically dispatched peer.
pub type SharedPeer = Arc<dyn Peer>;

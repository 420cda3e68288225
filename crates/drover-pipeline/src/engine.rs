//! Backend contract consumed by the runtime.

use std::sync::Arc;

use async_trait::async_trait;
use drover_types::{Config, RecoveryStatus, State, Step};
use tokio::io::AsyncRead;

use crate::error::EngineError;

/// Output stream of a running step.
pub type LogStream = Box<dyn AsyncRead + Send + Unpin>;

/// Shared engine handle; one instance multiplexes many workflows.
pub type SharedEngine = Arc<dyn Engine>;

/// A backend capable of running steps (docker, kubernetes, local exec, ...).
///
/// Every operation is scoped to a `task_uuid` (one per workflow run) so a
/// single engine can serve concurrently running workflows.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Backend name, reported to the server in `AgentInfo`.
    fn name(&self) -> &str;

    /// Prepare the sandbox shared by every step of the workflow.
    async fn setup_workflow(&self, config: &Config, task_uuid: &str) -> Result<(), EngineError>;

    /// Start a step without waiting for it.
    async fn start_step(&self, step: &Step, task_uuid: &str) -> Result<(), EngineError>;

    /// Block until a started step exits.
    async fn wait_step(&self, step: &Step, task_uuid: &str) -> Result<State, EngineError>;

    /// Stream a started step's output until it exits.
    async fn tail_step(&self, step: &Step, task_uuid: &str) -> Result<LogStream, EngineError>;

    /// Release resources held by a finished step.
    async fn destroy_step(&self, step: &Step, task_uuid: &str) -> Result<(), EngineError>;

    /// Release everything the workflow still holds.
    async fn destroy_workflow(&self, config: &Config, task_uuid: &str) -> Result<(), EngineError>;

    /// Recovery capability, if this backend can report live step status.
    fn as_recoverable(self: Arc<Self>) -> Option<Arc<dyn BackendRecovery>> {
        None
    }
}

/// Optional engine capability used by crash recovery.
#[async_trait]
pub trait BackendRecovery: Send + Sync {
    /// Live status of a step as the backend sees it.
    async fn get_step_status(
        &self,
        task_uuid: &str,
        step_uuid: &str,
    ) -> Result<RecoveryStatus, EngineError>;

    /// Remove backend-side state of abandoned workflows; returns how many were removed.
    async fn cleanup_expired_states(&self) -> Result<usize, EngineError>;
}

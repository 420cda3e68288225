//! HTTP request and response bodies shared by the server and its clients.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::rpc::{StepState, WorkflowState};
use crate::workflow::{Config, Workflow};

/// Header carrying the server-assigned agent id.
pub const AGENT_HEADER: &str = "X-Drover-Agent";

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Body returned by agent registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub agent_id: i64,
}

/// Body returned by a `wait` that resolved within the long-poll window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitResponse {
    pub canceled: bool,
}

/// A workflow to queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Assigned by the server when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub config: Config,
    #[serde(default)]
    pub timeout: u64,
    /// Labels an agent's filter must satisfy.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: String,
}

/// Scheduler-side lifecycle of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Queued,
    Running,
    Success,
    Failure,
    Canceled,
}

impl WorkflowStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Canceled)
    }
}

/// Body of `GET /workflows/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub workflow: Workflow,
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<i64>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub state: WorkflowState,
    /// Latest reported state per step, in no particular order.
    #[serde(default)]
    pub steps: Vec<StepState>,
    /// Log lines received so far.
    #[serde(default)]
    pub log_lines: usize,
    /// Times the workflow went back to the queue after a lost lease.
    #[serde(default)]
    pub requeues: u32,
}

/// Error body produced by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

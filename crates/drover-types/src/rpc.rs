//! Wire records exchanged between agents and the server.
//!
//! These are the only cross-process representations of execution outcome.
//! Timestamps are unix seconds; `0` means "not yet".

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Protocol revision spoken by this build. Agents refuse servers that differ.
pub const PROTOCOL_VERSION: u32 = 1;

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Workflow-level state sent with `Peer::init` and `Peer::done`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(default)]
    pub started: i64,
    #[serde(default)]
    pub finished: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub canceled: bool,
}

/// Step-level state sent with `Peer::update`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    pub step_uuid: String,
    #[serde(default)]
    pub started: i64,
    #[serde(default)]
    pub finished: i64,
    #[serde(default)]
    pub exited: bool,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub canceled: bool,
}

impl StepState {
    pub fn is_finished(&self) -> bool {
        self.finished != 0
    }
}

/// Server capability report returned by `Peer::version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub protocol_version: u32,
    pub server_version: String,
}

impl Version {
    /// The version this build of the server reports.
    pub fn current() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }
}

/// Agent description sent with `Peer::register_agent`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    #[serde(default)]
    pub hostname: String,
    pub version: String,
    pub platform: String,
    pub backend: String,
    pub capacity: u32,
    #[serde(default)]
    pub custom_labels: HashMap<String, String>,
}

/// One line of step output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub workflow_id: String,
    pub step_uuid: String,
    /// Seconds since the workflow started.
    pub time: i64,
    /// Zero-based line number within the step.
    pub line: u64,
    pub data: String,
}

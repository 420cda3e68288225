//! Per-step recovery records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a step as seen by the recovery store.
///
/// `Pending → Running → {Success | Failed | Skipped}`; terminal statuses are final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl RecoveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    /// Whether a record in this status may move to `next`.
    pub fn can_transition_to(self, next: RecoveryStatus) -> bool {
        !self.is_terminal() || self == next
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted status of one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryState {
    pub status: RecoveryStatus,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
}

impl RecoveryState {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn with_status(status: RecoveryStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Apply a transition in place, stamping start/finish times.
    pub fn apply(&mut self, status: RecoveryStatus, exit_code: i32, now: DateTime<Utc>) {
        match status {
            RecoveryStatus::Running => {
                self.started.get_or_insert(now);
            }
            s if s.is_terminal() => {
                self.started.get_or_insert(now);
                self.finished = Some(now);
            }
            _ => {}
        }
        self.status = status;
        self.exit_code = exit_code;
    }
}

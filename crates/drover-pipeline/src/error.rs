//! Error types for the execution runtime and recovery stores.

use drover_types::{RecoveryStatus, State};
use thiserror::Error;

/// Errors reported by an `Engine` implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Preparing the workflow sandbox failed.
    #[error("Workflow setup failed: {0}")]
    Setup(String),

    /// A step-scoped operation failed.
    #[error("Step '{step}': {message}")]
    Step { step: String, message: String },

    /// The engine has no record of the step.
    #[error("Unknown step: {0}")]
    UnknownStep(String),

    /// Tearing down a step or workflow failed.
    #[error("Teardown failed: {0}")]
    Teardown(String),
}

impl EngineError {
    pub fn step(step: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Step {
            step: step.into(),
            message: message.to_string(),
        }
    }
}

/// Terminal and per-step errors of a workflow run.
///
/// `Skip` and `Cancel` are control-flow sentinels, not failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The step was deliberately not run.
    #[error("Step skipped")]
    Skip,

    /// The run was aborted by cancellation.
    #[error("Workflow canceled")]
    Cancel,

    /// The step exited non-zero.
    #[error("Step '{name}' exited with code {code}")]
    Exit { name: String, code: i32, state: State },

    /// The step was killed by the kernel OOM killer.
    #[error("Step '{name}' was killed by the OOM killer (exit code {code})")]
    Oom { name: String, code: i32, state: State },

    /// The engine failed to run the step.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl RuntimeError {
    /// Classify a process outcome: `None` means the step succeeded.
    pub fn from_state(name: &str, state: State) -> Option<Self> {
        if state.oom_killed {
            Some(Self::Oom {
                name: name.to_string(),
                code: state.exit_code,
                state,
            })
        } else if state.exit_code != 0 {
            Some(Self::Exit {
                name: name.to_string(),
                code: state.exit_code,
                state,
            })
        } else {
            None
        }
    }

    /// Raw process outcome wrapped by step outcome errors.
    pub fn state(&self) -> Option<State> {
        match self {
            Self::Exit { state, .. } | Self::Oom { state, .. } => Some(*state),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.state().map(|state| state.exit_code)
    }

    /// Skip or Cancel.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::Skip | Self::Cancel)
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self, Self::Cancel)
    }
}

/// Errors from a recovery `StateStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No recovery record for the workflow.
    #[error("No recovery state for workflow: {0}")]
    NotFound(String),

    /// Optimistic-concurrency retries were exhausted.
    #[error("Conflicting updates to workflow {workflow_id} after {attempts} attempts")]
    Conflict { workflow_id: String, attempts: u32 },

    /// The record is already in a terminal status.
    #[error("Step {step_uuid} cannot move from {from} to {to}")]
    InvalidTransition {
        step_uuid: String,
        from: RecoveryStatus,
        to: RecoveryStatus,
    },

    /// The expiry cannot be represented as a timestamp.
    #[error("TTL of {0}s is out of range")]
    InvalidTtl(u64),

    /// Another process held the record lock for too long.
    #[error("Timed out waiting for the lock on workflow {0}")]
    Locked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_oom() {
        let err = RuntimeError::from_state("build", State::oom_killed(137)).unwrap();
        match &err {
            RuntimeError::Oom { name, code, .. } => {
                assert_eq!(name, "build");
                assert_eq!(*code, 137);
            }
            other => panic!("Expected Oom, got: {other:?}"),
        }
        assert_eq!(err.state(), Some(State::oom_killed(137)));
    }

    #[test]
    fn test_classify_exit() {
        let err = RuntimeError::from_state("test", State::exited(1)).unwrap();
        assert!(matches!(err, RuntimeError::Exit { code: 1, .. }));
        assert_eq!(err.to_string(), "Step 'test' exited with code 1");
    }

    #[test]
    fn test_classify_success() {
        assert!(RuntimeError::from_state("lint", State::exited(0)).is_none());
    }

    #[test]
    fn test_sentinels() {
        assert!(RuntimeError::Skip.is_sentinel());
        assert!(RuntimeError::Cancel.is_sentinel());
        assert!(!RuntimeError::Engine(EngineError::Setup("x".into())).is_sentinel());
        assert_eq!(RuntimeError::Cancel.exit_code(), None);
    }
}

//! Observation hooks: step tracing and log streaming.

use async_trait::async_trait;
use drover_types::{State, Step};

use crate::engine::LogStream;
use crate::error::RuntimeError;

/// Emitted once before and once after every dispatched step.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    /// Unix seconds at which the workflow run started.
    pub workflow_started: i64,
    /// The step about to run (or that ran). Before a step starts the tracer
    /// may edit it, typically to inject environment variables; the runtime
    /// executes the edited copy.
    pub step: Step,
    /// Process outcome; `None` before the step starts and for detached steps.
    pub state: Option<State>,
    /// This step's own failure, if any.
    pub step_error: Option<RuntimeError>,
    /// The workflow's terminal error so far.
    pub error: Option<RuntimeError>,
    /// False for the event emitted before the step starts.
    pub finished: bool,
}

impl TraceEvent {
    pub fn before(workflow_started: i64, step: Step, error: Option<RuntimeError>) -> Self {
        Self {
            workflow_started,
            step,
            state: None,
            step_error: None,
            error,
            finished: false,
        }
    }

    pub fn after(
        workflow_started: i64,
        step: Step,
        state: Option<State>,
        step_error: Option<RuntimeError>,
        error: Option<RuntimeError>,
    ) -> Self {
        Self {
            workflow_started,
            step,
            state,
            step_error,
            error,
            finished: true,
        }
    }
}

/// Receives step trace events.
///
/// Implementations must not fail the run: errors are theirs to log.
#[async_trait]
pub trait Tracer: Send + Sync {
    async fn trace(&self, event: &mut TraceEvent);
}

/// Consumes a step's output stream on its own task.
#[async_trait]
pub trait Logger: Send + Sync {
    async fn log(&self, step: &Step, stream: LogStream);
}

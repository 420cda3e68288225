//! Step tracer that reports progress to the server.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use drover_pipeline::{RuntimeError, TraceEvent, Tracer};
use drover_types::{SharedPeer, StepState, unix_now};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::platform;
use crate::counters::AgentCounters;

/// Reports step state through the peer and injects `CI_*` variables.
///
/// One tracer per workflow run.
pub struct AgentTracer {
    peer: SharedPeer,
    workflow_id: String,
    hostname: String,
    counters: Arc<AgentCounters>,
    /// Start time of every step seen so far, keyed by step uuid.
    started: Mutex<HashMap<String, i64>>,
}

impl AgentTracer {
    pub fn new(
        peer: SharedPeer,
        workflow_id: impl Into<String>,
        hostname: impl Into<String>,
        counters: Arc<AgentCounters>,
    ) -> Self {
        Self {
            peer,
            workflow_id: workflow_id.into(),
            hostname: hostname.into(),
            counters,
            started: Mutex::new(HashMap::new()),
        }
    }

    fn inject_env(&self, event: &mut TraceEvent, step_started: i64) {
        let status = if event.error.is_some() {
            "failure"
        } else {
            "success"
        };
        let env = &mut event.step.environment;
        env.insert("CI_PIPELINE_STATUS".into(), status.into());
        env.insert(
            "CI_PIPELINE_STARTED".into(),
            event.workflow_started.to_string(),
        );
        env.insert("CI_STEP_STARTED".into(), step_started.to_string());
        env.insert("CI_STEP_STATUS".into(), status.into());
        env.insert("CI_MACHINE".into(), self.hostname.clone());
        env.insert("CI_SYSTEM_PLATFORM".into(), platform());
    }

    fn step_state(&self, event: &TraceEvent, now: i64) -> StepState {
        let uuid = &event.step.uuid;
        if !event.finished {
            return StepState {
                step_uuid: uuid.clone(),
                started: now,
                ..Default::default()
            };
        }

        let started = self.started.lock().remove(uuid).unwrap_or(now);
        let state = event.state.or_else(|| event.step_error.as_ref()?.state());
        let error = event
            .step_error
            .as_ref()
            .filter(|e| !matches!(e, RuntimeError::Skip))
            .map(ToString::to_string);

        StepState {
            step_uuid: uuid.clone(),
            started,
            finished: now,
            exited: state.is_some_and(|s| s.exited),
            exit_code: state.map(|s| s.exit_code).unwrap_or_default(),
            error,
            canceled: event.step_error.as_ref().is_some_and(RuntimeError::is_cancel),
        }
    }
}

#[async_trait]
impl Tracer for AgentTracer {
    async fn trace(&self, event: &mut TraceEvent) {
        let now = unix_now();
        let state = self.step_state(event, now);

        if event.finished {
            self.counters.step_finished();
        } else {
            self.started.lock().insert(event.step.uuid.clone(), now);
            self.counters.step_started();
            self.inject_env(event, now);
        }

        debug!(
            workflow_id = %self.workflow_id,
            step = %event.step.name,
            finished = event.finished,
            "Tracing step"
        );

        if let Err(e) = self.peer.update(&self.workflow_id, state).await {
            warn!(
                workflow_id = %self.workflow_id,
                step = %event.step.name,
                error = %e,
                "Failed to report step state"
            );
        }
    }
}

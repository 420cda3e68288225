//! Scriptable engine, tracer and logger for tests.
//!
//! Enabled by the `testing` feature so downstream crates can drive a real
//! [`Runtime`](crate::Runtime) without a container backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drover_types::{Config, RecoveryStatus, State, Step};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;

use crate::engine::{BackendRecovery, Engine, LogStream};
use crate::error::EngineError;
use crate::trace::{Logger, TraceEvent, Tracer};

/// One observed engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Setup,
    Start(String),
    Wait(String),
    Tail(String),
    DestroyStep(String),
    DestroyWorkflow,
    /// Live status query by step UUID.
    StatusQuery(String),
}

/// In-memory engine whose step outcomes are scripted by step name.
///
/// Steps not scripted exit 0 immediately.
#[derive(Debug, Default)]
pub struct MockEngine {
    recoverable: bool,
    setup_failure: Option<String>,
    exits: HashMap<String, State>,
    outputs: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    start_failures: HashMap<String, String>,
    live_status: Mutex<HashMap<String, RecoveryStatus>>,
    calls: Mutex<Vec<EngineCall>>,
    started: Mutex<Vec<Step>>,
    cleanups: Mutex<usize>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose the recovery capability.
    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }

    pub fn with_setup_failure(mut self, message: impl Into<String>) -> Self {
        self.setup_failure = Some(message.into());
        self
    }

    pub fn with_exit(mut self, step: impl Into<String>, code: i32) -> Self {
        self.exits.insert(step.into(), State::exited(code));
        self
    }

    pub fn with_oom(mut self, step: impl Into<String>, code: i32) -> Self {
        self.exits.insert(step.into(), State::oom_killed(code));
        self
    }

    /// Output returned by `tail_step`.
    pub fn with_output(mut self, step: impl Into<String>, output: impl Into<String>) -> Self {
        self.outputs.insert(step.into(), output.into());
        self
    }

    /// Make `wait_step` take this long.
    pub fn with_delay(mut self, step: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(step.into(), delay);
        self
    }

    pub fn with_start_failure(
        mut self,
        step: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.start_failures.insert(step.into(), message.into());
        self
    }

    /// Status reported by the recovery capability for a step UUID.
    pub fn set_live_status(&self, step_uuid: impl Into<String>, status: RecoveryStatus) {
        self.live_status.lock().insert(step_uuid.into(), status);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    /// Names of started steps, in start order.
    pub fn starts(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                EngineCall::Start(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn waited(&self, step: &str) -> bool {
        self.calls
            .lock()
            .contains(&EngineCall::Wait(step.to_string()))
    }

    /// The step exactly as the engine received it.
    pub fn started_step(&self, name: &str) -> Option<Step> {
        self.started.lock().iter().find(|s| s.name == name).cloned()
    }

    pub fn cleanups(&self) -> usize {
        *self.cleanups.lock()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn setup_workflow(&self, _config: &Config, _task_uuid: &str) -> Result<(), EngineError> {
        self.record(EngineCall::Setup);
        match &self.setup_failure {
            Some(message) => Err(EngineError::Setup(message.clone())),
            None => Ok(()),
        }
    }

    async fn start_step(&self, step: &Step, _task_uuid: &str) -> Result<(), EngineError> {
        self.record(EngineCall::Start(step.name.clone()));
        self.started.lock().push(step.clone());
        match self.start_failures.get(&step.name) {
            Some(message) => Err(EngineError::step(step.name.clone(), message)),
            None => Ok(()),
        }
    }

    async fn wait_step(&self, step: &Step, _task_uuid: &str) -> Result<State, EngineError> {
        self.record(EngineCall::Wait(step.name.clone()));
        if let Some(delay) = self.delays.get(&step.name) {
            tokio::time::sleep(*delay).await;
        }
        Ok(self
            .exits
            .get(&step.name)
            .copied()
            .unwrap_or_else(|| State::exited(0)))
    }

    async fn tail_step(&self, step: &Step, _task_uuid: &str) -> Result<LogStream, EngineError> {
        self.record(EngineCall::Tail(step.name.clone()));
        let output = self.outputs.get(&step.name).cloned().unwrap_or_default();
        Ok(Box::new(std::io::Cursor::new(output.into_bytes())))
    }

    async fn destroy_step(&self, step: &Step, _task_uuid: &str) -> Result<(), EngineError> {
        self.record(EngineCall::DestroyStep(step.name.clone()));
        Ok(())
    }

    async fn destroy_workflow(&self, _config: &Config, _task_uuid: &str) -> Result<(), EngineError> {
        self.record(EngineCall::DestroyWorkflow);
        Ok(())
    }

    fn as_recoverable(self: Arc<Self>) -> Option<Arc<dyn BackendRecovery>> {
        if self.recoverable { Some(self) } else { None }
    }
}

#[async_trait]
impl BackendRecovery for MockEngine {
    async fn get_step_status(
        &self,
        _task_uuid: &str,
        step_uuid: &str,
    ) -> Result<RecoveryStatus, EngineError> {
        self.record(EngineCall::StatusQuery(step_uuid.to_string()));
        self.live_status
            .lock()
            .get(step_uuid)
            .copied()
            .ok_or_else(|| EngineError::UnknownStep(step_uuid.to_string()))
    }

    async fn cleanup_expired_states(&self) -> Result<usize, EngineError> {
        *self.cleanups.lock() += 1;
        Ok(0)
    }
}

/// Tracer that records every event and optionally injects environment
/// variables before a step starts.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    inject: Vec<(String, String)>,
    events: Mutex<Vec<TraceEvent>>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn injecting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inject.push((key.into(), value.into()));
        self
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    /// Events emitted for the named step.
    pub fn events_for(&self, step: &str) -> Vec<TraceEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.step.name == step)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Tracer for RecordingTracer {
    async fn trace(&self, event: &mut TraceEvent) {
        if !event.finished {
            for (key, value) in &self.inject {
                event.step.environment.insert(key.clone(), value.clone());
            }
        }
        self.events.lock().push(event.clone());
    }
}

/// Logger that collects each step's output as a string.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    output: Mutex<HashMap<String, String>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self, step: &str) -> Option<String> {
        self.output.lock().get(step).cloned()
    }
}

#[async_trait]
impl Logger for RecordingLogger {
    async fn log(&self, step: &Step, mut stream: LogStream) {
        let mut text = String::new();
        if stream.read_to_string(&mut text).await.is_ok() {
            self.output.lock().insert(step.name.clone(), text);
        }
    }
}

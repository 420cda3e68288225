//! Workflow execution: stages in order, steps of a stage concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use drover_types::{Config, RecoveryState, RecoveryStatus, State, Step, unix_now};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{BackendRecovery, SharedEngine};
use crate::env::apply_legacy_env;
use crate::error::{EngineError, RuntimeError};
use crate::recovery::RecoveryManager;
use crate::trace::{Logger, TraceEvent, Tracer};

/// Runs one workflow against an engine.
///
/// Produces exactly one terminal error per run: the first one encountered.
/// Cheap to clone; clones share the same run.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    engine: SharedEngine,
    /// Resolved once at build time.
    recoverable: Option<Arc<dyn BackendRecovery>>,
    task_uuid: String,
    tracer: Option<Arc<dyn Tracer>>,
    logger: Option<Arc<dyn Logger>>,
    recovery: Arc<RecoveryManager>,
    cancel: CancellationToken,
    started: AtomicI64,
    err: Mutex<Option<RuntimeError>>,
}

/// Builder for [`Runtime`].
pub struct RuntimeBuilder {
    config: Config,
    engine: SharedEngine,
    task_uuid: Option<String>,
    tracer: Option<Arc<dyn Tracer>>,
    logger: Option<Arc<dyn Logger>>,
    recovery: Option<Arc<RecoveryManager>>,
    cancel: Option<CancellationToken>,
}

impl RuntimeBuilder {
    /// Engine-side id of this run. Defaults to a fresh UUID.
    pub fn with_task_uuid(mut self, task_uuid: impl Into<String>) -> Self {
        self.task_uuid = Some(task_uuid.into());
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_recovery(mut self, recovery: Arc<RecoveryManager>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// Cancellation signal shared by every step of the run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Runtime {
        let recoverable = self.engine.clone().as_recoverable();
        let recovery = self
            .recovery
            .unwrap_or_else(|| Arc::new(RecoveryManager::disabled()));

        if recoverable.is_none() && recovery.is_enabled() {
            warn!(
                engine = self.engine.name(),
                "Engine cannot report live step status, disabling recovery"
            );
            recovery.disable();
        }

        Runtime {
            inner: Arc::new(Inner {
                config: self.config,
                engine: self.engine,
                recoverable,
                task_uuid: self
                    .task_uuid
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                tracer: self.tracer,
                logger: self.logger,
                recovery,
                cancel: self.cancel.unwrap_or_default(),
                started: AtomicI64::new(0),
                err: Mutex::new(None),
            }),
        }
    }
}

impl Runtime {
    pub fn builder(config: Config, engine: SharedEngine) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            engine,
            task_uuid: None,
            tracer: None,
            logger: None,
            recovery: None,
            cancel: None,
        }
    }

    pub fn task_uuid(&self) -> &str {
        &self.inner.task_uuid
    }

    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.inner.recovery
    }

    /// Terminal error recorded so far.
    pub fn error(&self) -> Option<RuntimeError> {
        self.inner.error()
    }

    /// Execute the workflow.
    ///
    /// Returns [`RuntimeError::Cancel`] as soon as the cancellation token
    /// fires, without awaiting in-flight steps. The workflow is torn down
    /// on every path; teardown failures are logged only.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let inner = &self.inner;
        inner.started.store(unix_now(), Ordering::SeqCst);
        info!(
            task_uuid = %inner.task_uuid,
            stages = inner.config.stages.len(),
            "Starting workflow"
        );

        let result = inner.clone().execute().await;

        if let Err(e) = inner
            .engine
            .destroy_workflow(&inner.config, &inner.task_uuid)
            .await
        {
            warn!(task_uuid = %inner.task_uuid, error = %e, "Failed to destroy workflow");
        }

        match &result {
            Ok(()) => info!(task_uuid = %inner.task_uuid, "Workflow finished"),
            Err(e) if e.is_sentinel() => {
                info!(task_uuid = %inner.task_uuid, reason = %e, "Workflow stopped")
            }
            Err(e) => info!(task_uuid = %inner.task_uuid, error = %e, "Workflow failed"),
        }
        result
    }
}

impl Inner {
    fn started(&self) -> i64 {
        self.started.load(Ordering::SeqCst)
    }

    fn error(&self) -> Option<RuntimeError> {
        self.err.lock().clone()
    }

    /// Record `err` unless an earlier error already won; returns `err`.
    fn fail(&self, err: RuntimeError) -> RuntimeError {
        let mut slot = self.err.lock();
        if slot.is_none() {
            *slot = Some(err.clone());
        }
        err
    }

    async fn execute(self: Arc<Self>) -> Result<(), RuntimeError> {
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(self.fail(RuntimeError::Cancel)),
            setup = self.engine.setup_workflow(&self.config, &self.task_uuid) => {
                setup.map_err(|e| self.fail(e.into()))?;
            }
        }

        for (index, stage) in self.config.stages.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(self.fail(RuntimeError::Cancel));
            }

            let failed = self.error().is_some();
            debug!(stage = %stage.name, index, failed, "Starting stage");

            let mut handles = Vec::with_capacity(stage.steps.len());
            for step in &stage.steps {
                if !step.should_run(failed) {
                    debug!(step = %step.name, failed, "Step not dispatched by run policy");
                    self.mark_not_dispatched(step).await;
                    continue;
                }
                handles.push(tokio::spawn(self.clone().run_step(step.clone())));
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(self.fail(RuntimeError::Cancel)),
                results = join_all(handles) => {
                    for result in results {
                        if let Err(e) = result {
                            error!(stage = %stage.name, error = %e, "Step task panicked");
                            self.fail(EngineError::step(stage.name.clone(), e).into());
                        }
                    }
                }
            }
        }

        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn mark_not_dispatched(&self, step: &Step) {
        if self.recovery.should_skip_step(step).0 {
            return;
        }
        if let Err(e) = self.recovery.mark_step_skipped(step).await {
            warn!(step = %step.name, error = %e, "Failed to record skipped step");
        }
    }

    async fn run_step(self: Arc<Self>, mut step: Step) {
        if let Some(tracer) = &self.tracer {
            let mut event = TraceEvent::before(self.started(), step, self.error());
            tracer.trace(&mut event).await;
            step = event.step;
        }
        apply_legacy_env(&mut step.environment);

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Err(RuntimeError::Cancel),
            outcome = self.exec(&step) => outcome,
        };

        let (state, step_error) = match outcome {
            Ok(state) => (state, None),
            Err(e) => (e.state(), Some(e)),
        };

        if let Some(err) = &step_error
            && !matches!(err, RuntimeError::Skip)
        {
            if !err.is_sentinel() {
                warn!(step = %step.name, error = %err, "Step failed");
            }
            self.fail(err.clone());
        }

        if let Some(tracer) = &self.tracer {
            let mut event =
                TraceEvent::after(self.started(), step, state, step_error, self.error());
            tracer.trace(&mut event).await;
        }
    }

    /// Dispatch one step: skip, reconnect, or start it fresh.
    async fn exec(&self, step: &Step) -> Result<Option<State>, RuntimeError> {
        let (skip, cached) = self.recovery.should_skip_step(step);
        if skip {
            let cached = cached.unwrap_or_default();
            info!(
                step = %step.name,
                status = %cached.status,
                "Step already finished in a previous run"
            );
            return match cached.status {
                RecoveryStatus::Failed => {
                    classify(step, State::exited(cached.exit_code.max(1))).map(Some)
                }
                _ => Err(RuntimeError::Skip),
            };
        }

        if RecoveryManager::should_reconnect(cached.as_ref()) {
            return self.exec_reconnect(step, cached).await;
        }
        self.exec_fresh(step).await
    }

    async fn exec_fresh(&self, step: &Step) -> Result<Option<State>, RuntimeError> {
        if let Err(e) = self.recovery.mark_step_running(step).await {
            warn!(step = %step.name, error = %e, "Failed to record running step");
        }

        debug!(step = %step.name, detached = step.detached, "Starting step");
        if let Err(e) = self.engine.start_step(step, &self.task_uuid).await {
            self.record_failure(step, 1).await;
            return Err(e.into());
        }

        if step.detached {
            return Ok(None);
        }
        self.follow(step).await.map(Some)
    }

    /// A previous run left the step `Running`: find out what became of it
    /// before touching the engine's wait/tail machinery.
    async fn exec_reconnect(
        &self,
        step: &Step,
        cached: Option<RecoveryState>,
    ) -> Result<Option<State>, RuntimeError> {
        let Some(backend) = &self.recoverable else {
            return self.exec_fresh(step).await;
        };

        let live = backend.get_step_status(&self.task_uuid, &step.uuid).await;
        info!(step = %step.name, live = ?live, "Reconnecting to step from a previous run");

        match live {
            Ok(RecoveryStatus::Pending) => self.exec_fresh(step).await,
            Ok(RecoveryStatus::Running) if step.detached => Ok(None),
            Ok(status) if step.detached => {
                debug!(step = %step.name, %status, "Detached step is gone, restarting");
                self.exec_fresh(step).await
            }
            Ok(RecoveryStatus::Success) => {
                let state = State::exited(0);
                self.record_outcome(step, state).await;
                classify(step, state).map(Some)
            }
            Ok(RecoveryStatus::Failed) => {
                let code = cached.map_or(1, |c| c.exit_code).max(1);
                let state = State::exited(code);
                self.record_outcome(step, state).await;
                classify(step, state).map(Some)
            }
            Ok(RecoveryStatus::Skipped) => {
                if let Err(e) = self.recovery.mark_step_skipped(step).await {
                    warn!(step = %step.name, error = %e, "Failed to record skipped step");
                }
                Err(RuntimeError::Skip)
            }
            Ok(RecoveryStatus::Running) => self.follow(step).await.map(Some),
            Err(e) => {
                warn!(step = %step.name, error = %e, "Live status query failed, re-attaching");
                self.follow(step).await.map(Some)
            }
        }
    }

    /// Stream logs, wait for exit, and release the step.
    async fn follow(&self, step: &Step) -> Result<State, RuntimeError> {
        let log_task = match &self.logger {
            Some(logger) => match self.engine.tail_step(step, &self.task_uuid).await {
                Ok(stream) => {
                    let logger = logger.clone();
                    let step = step.clone();
                    Some(tokio::spawn(async move { logger.log(&step, stream).await }))
                }
                Err(e) => {
                    warn!(step = %step.name, error = %e, "Failed to tail step output");
                    None
                }
            },
            None => None,
        };

        let waited = self.engine.wait_step(step, &self.task_uuid).await;

        if let Some(task) = log_task
            && let Err(e) = task.await
        {
            warn!(step = %step.name, error = %e, "Log streaming task failed");
        }

        if let Err(e) = self.engine.destroy_step(step, &self.task_uuid).await {
            warn!(step = %step.name, error = %e, "Failed to destroy step");
        }

        let state = match waited {
            Ok(state) => state,
            Err(e) => {
                self.record_failure(step, 1).await;
                return Err(e.into());
            }
        };

        debug!(
            step = %step.name,
            exit_code = state.exit_code,
            oom_killed = state.oom_killed,
            "Step exited"
        );
        self.record_outcome(step, state).await;
        classify(step, state)
    }

    async fn record_outcome(&self, step: &Step, state: State) {
        if state.is_success() {
            if let Err(e) = self.recovery.mark_step_success(step).await {
                warn!(step = %step.name, error = %e, "Failed to record step success");
            }
        } else {
            self.record_failure(step, state.exit_code).await;
        }
    }

    async fn record_failure(&self, step: &Step, exit_code: i32) {
        // The step may still be running on a backend another agent can reach.
        if self.cancel.is_cancelled() {
            return;
        }
        if let Err(e) = self.recovery.mark_step_failed(step, exit_code).await {
            warn!(step = %step.name, error = %e, "Failed to record step failure");
        }
    }
}

fn classify(step: &Step, state: State) -> Result<State, RuntimeError> {
    match RuntimeError::from_state(&step.name, state) {
        Some(err) => Err(err),
        None => Ok(state),
    }
}

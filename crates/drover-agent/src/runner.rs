//! Capacity slots: poll for work, run it, report it.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use drover_pipeline::{RecoveryManager, Runtime, SharedEngine, SharedStateStore};
use drover_types::{PeerError, SharedPeer, Workflow, WorkflowState, unix_now};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AgentConfig, MAX_CALL_ATTEMPTS};
use crate::counters::AgentCounters;
use crate::error::Result;
use crate::logger::AgentLogger;
use crate::tracer::AgentTracer;

/// State shared by every slot of one agent.
pub(crate) struct Runner {
    pub(crate) peer: SharedPeer,
    pub(crate) engine: SharedEngine,
    pub(crate) store: Option<SharedStateStore>,
    pub(crate) config: Arc<AgentConfig>,
    pub(crate) counters: Arc<AgentCounters>,
}

impl Runner {
    /// Poll and run workflows until `shutdown` fires or a fatal error occurs.
    pub(crate) async fn run_slot(
        self: Arc<Self>,
        slot: usize,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let filter = self.config.filter();
        let mut backoff = self.config.retry_backoff;
        debug!(slot, "Runner slot started");

        loop {
            let next = {
                let _polling = self.counters.polling();
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = self.peer.next(&filter) => next,
                }
            };

            match next {
                Ok(Some(workflow)) => {
                    backoff = self.config.retry_backoff;
                    self.run_workflow(workflow, &shutdown).await;
                }
                Ok(None) => backoff = self.config.retry_backoff,
                Err(e) if e.is_fatal() => {
                    error!(slot, error = %e, "Fatal error fetching work");
                    return Err(e.into());
                }
                Err(e) => {
                    let delay = if e.is_retryable() {
                        let delay = backoff;
                        backoff = self.config.next_backoff(backoff);
                        delay
                    } else {
                        self.config.retry_backoff
                    };
                    warn!(
                        slot,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Failed to fetch next workflow"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        debug!(slot, "Runner slot stopped");
        Ok(())
    }

    /// Run one assigned workflow to completion.
    ///
    /// `shutdown` is the agent's token; the run gets a child of it.
    pub(crate) async fn run_workflow(&self, workflow: Workflow, shutdown: &CancellationToken) {
        let _running = self.counters.running_workflow();
        let id = workflow.id.clone();
        let token = shutdown.child_token();
        let recovery = Arc::new(match &self.store {
            Some(store) => RecoveryManager::new(Arc::clone(store), &id, true),
            None => RecoveryManager::disabled(),
        });

        info!(
            workflow_id = %id,
            stages = workflow.config.stages.len(),
            timeout = workflow.timeout,
            "Running workflow"
        );

        let mut state = WorkflowState {
            started: unix_now(),
            ..Default::default()
        };
        let init = self
            .call_with_retry(|| self.peer.init(&id, state.clone()))
            .await;
        if let Err(e) = init {
            warn!(workflow_id = %id, error = %e, "Failed to init workflow, dropping it");
            return;
        }

        let timed_out = Arc::new(AtomicBool::new(false));
        let mut helpers = vec![
            tokio::spawn(watch_cancel(
                Arc::clone(&self.peer),
                id.clone(),
                Arc::clone(&recovery),
                token.clone(),
                Arc::clone(&self.config),
            )),
            tokio::spawn(extend_lease(
                Arc::clone(&self.peer),
                id.clone(),
                token.clone(),
                self.config.extend_interval,
            )),
        ];
        if workflow.timeout > 0 {
            helpers.push(spawn_deadline(
                id.clone(),
                Duration::from_secs(workflow.timeout),
                Arc::clone(&recovery),
                token.clone(),
                Arc::clone(&timed_out),
            ));
        }

        let runtime = Runtime::builder(workflow.config.clone(), Arc::clone(&self.engine))
            .with_task_uuid(&id)
            .with_tracer(Arc::new(AgentTracer::new(
                Arc::clone(&self.peer),
                &id,
                &self.config.hostname,
                Arc::clone(&self.counters),
            )))
            .with_logger(Arc::new(AgentLogger::new(
                Arc::clone(&self.peer),
                &id,
                state.started,
            )))
            .with_recovery(Arc::clone(&recovery))
            .with_cancellation(token.clone())
            .build();

        let ttl = self.config.recovery_ttl_secs.max(workflow.timeout);
        match runtime
            .recovery()
            .init_recovery_state(&workflow.config, ttl)
            .await
        {
            Err(e) => {
                error!(workflow_id = %id, error = %e, "Recovery state unavailable, failing workflow");
                state.error = Some(format!("recovery state unavailable: {e}"));
            }
            Ok(()) => match runtime.run().await {
                Ok(()) => {}
                Err(e) if e.is_cancel() => {
                    state.canceled = true;
                    if timed_out.load(Ordering::SeqCst) {
                        state.error = Some(format!(
                            "workflow timed out after {}s",
                            workflow.timeout
                        ));
                    }
                }
                Err(e) => state.error = Some(e.to_string()),
            },
        }
        state.finished = unix_now();
        abort_all(helpers).await;

        if state.canceled && recovery.is_recoverable(shutdown) {
            info!(
                workflow_id = %id,
                "Agent shutting down, leaving workflow for recovery"
            );
            return;
        }

        let done = self
            .call_with_retry(|| self.peer.done(&id, state.clone()))
            .await;
        match done {
            Ok(()) => {
                self.counters.workflow_completed();
                if let Err(e) = recovery.delete().await {
                    warn!(workflow_id = %id, error = %e, "Failed to delete recovery state");
                }
                info!(
                    workflow_id = %id,
                    canceled = state.canceled,
                    error = state.error.as_deref().unwrap_or(""),
                    "Workflow done"
                );
            }
            Err(e) => warn!(workflow_id = %id, error = %e, "Failed to report workflow done"),
        }
    }

    /// Retry a protocol call on transport errors, a bounded number of times.
    async fn call_with_retry<T, F, Fut>(&self, mut call: F) -> drover_types::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = drover_types::Result<T>>,
    {
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_retryable() && attempt < MAX_CALL_ATTEMPTS => {
                    debug!(attempt, error = %e, "Retrying protocol call");
                    tokio::time::sleep(backoff).await;
                    backoff = self.config.next_backoff(backoff);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Follow the server-side lifecycle; cancel the run when the server says so.
async fn watch_cancel(
    peer: SharedPeer,
    id: String,
    recovery: Arc<RecoveryManager>,
    token: CancellationToken,
    config: Arc<AgentConfig>,
) {
    let mut backoff = config.retry_backoff;
    loop {
        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = peer.wait(&id) => result,
        };

        match result {
            Ok(true) => {
                info!(workflow_id = %id, "Workflow canceled by server");
                recovery.set_canceled();
                token.cancel();
                return;
            }
            Ok(false) => return,
            Err(e) if e.is_retryable() => {
                debug!(workflow_id = %id, error = %e, "Wait failed, retrying");
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = config.next_backoff(backoff);
            }
            Err(e) => {
                warn!(workflow_id = %id, error = %e, "Stopped watching for cancellation");
                return;
            }
        }
    }
}

/// Renew the lease every `interval` until the run ends.
async fn extend_lease(
    peer: SharedPeer,
    id: String,
    token: CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match peer.extend(&id).await {
            Ok(()) => debug!(workflow_id = %id, "Lease extended"),
            Err(PeerError::WorkflowNotFound(_)) => {
                warn!(workflow_id = %id, "Server forgot workflow, stopping lease renewal");
                return;
            }
            Err(e) => warn!(workflow_id = %id, error = %e, "Failed to extend lease"),
        }
    }
}

fn spawn_deadline(
    id: String,
    timeout: Duration,
    recovery: Arc<RecoveryManager>,
    token: CancellationToken,
    timed_out: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                warn!(workflow_id = %id, timeout_secs = timeout.as_secs(), "Workflow timed out");
                timed_out.store(true, Ordering::SeqCst);
                recovery.set_canceled();
                token.cancel();
            }
        }
    })
}

async fn abort_all(helpers: Vec<JoinHandle<()>>) {
    for handle in &helpers {
        handle.abort();
    }
    for handle in helpers {
        if let Err(e) = handle.await
            && !e.is_cancelled()
        {
            warn!(error = %e, "Workflow helper task failed");
        }
    }
}

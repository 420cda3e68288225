//! Scheduler core: the work queue, assignments and their leases, server-side
//! cancellation, and the agent registry.
//!
//! All state sits behind one lock that is never held across an await.
//! Blocking calls (`next`, `wait`) park on a [`Notify`] or a per-workflow
//! watch channel and return `None` when their long-poll window elapses.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use drover_config::defaults;
use drover_types::{
    AgentInfo, Filter, LogEntry, PeerError, Result, StepState, SubmitRequest, Workflow,
    WorkflowInfo, WorkflowState, WorkflowStatus, unix_now,
};
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a `wait` caller learns once the workflow leaves `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Pending,
    Finished,
    Canceled,
}

struct Entry {
    workflow: Workflow,
    labels: HashMap<String, String>,
    status: WorkflowStatus,
    agent_id: Option<i64>,
    deadline: Option<Instant>,
    state: WorkflowState,
    steps: HashMap<String, StepState>,
    logs: Vec<LogEntry>,
    dropped_logs: usize,
    requeues: u32,
    cancel_requested: bool,
    finished_at: Option<Instant>,
    signal: watch::Sender<Signal>,
}

impl Entry {
    fn new(workflow: Workflow, labels: HashMap<String, String>) -> Self {
        Self {
            workflow,
            labels,
            status: WorkflowStatus::Queued,
            agent_id: None,
            deadline: None,
            state: WorkflowState::default(),
            steps: HashMap::new(),
            logs: Vec::new(),
            dropped_logs: 0,
            requeues: 0,
            cancel_requested: false,
            finished_at: None,
            signal: watch::channel(Signal::Pending).0,
        }
    }

    fn info(&self) -> WorkflowInfo {
        WorkflowInfo {
            workflow: self.workflow.clone(),
            status: self.status,
            agent_id: self.agent_id,
            labels: self.labels.clone(),
            state: self.state.clone(),
            steps: self.steps.values().cloned().collect(),
            log_lines: self.logs.len(),
            requeues: self.requeues,
        }
    }

    /// Reject calls from anyone but the assigned agent on a live assignment.
    fn check_assigned(&self, id: &str, agent: Option<i64>) -> Result<()> {
        if self.status.is_finished() {
            return Err(PeerError::Rejected(format!("workflow {id} is already done")));
        }
        if self.status == WorkflowStatus::Queued {
            return Err(PeerError::Rejected(format!("workflow {id} is not assigned")));
        }
        check_agent(self, id, agent)
    }
}

fn check_agent(entry: &Entry, id: &str, agent: Option<i64>) -> Result<()> {
    match (agent, entry.agent_id) {
        (Some(caller), Some(owner)) if caller != owner => Err(PeerError::Rejected(format!(
            "workflow {id} is assigned to agent {owner}"
        ))),
        _ => Ok(()),
    }
}

struct AgentEntry {
    info: AgentInfo,
    last_seen: Instant,
}

#[derive(Default)]
struct HubState {
    queue: VecDeque<String>,
    workflows: HashMap<String, Entry>,
    agents: HashMap<i64, AgentEntry>,
    last_agent_id: i64,
}

impl HubState {
    fn entry(&self, id: &str) -> Result<&Entry> {
        self.workflows
            .get(id)
            .ok_or_else(|| PeerError::WorkflowNotFound(id.to_string()))
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut Entry> {
        self.workflows
            .get_mut(id)
            .ok_or_else(|| PeerError::WorkflowNotFound(id.to_string()))
    }

    /// Hand the oldest matching queued workflow to `agent`.
    fn assign(&mut self, agent: Option<i64>, filter: &Filter, lease: Duration) -> Option<Workflow> {
        let position = self.queue.iter().position(|id| {
            self.workflows
                .get(id)
                .is_some_and(|entry| filter.matches(&entry.labels))
        })?;
        let id = self.queue.remove(position)?;
        let entry = self.workflows.get_mut(&id)?;
        entry.status = WorkflowStatus::Running;
        entry.agent_id = agent;
        entry.deadline = Some(Instant::now() + lease);
        Some(entry.workflow.clone())
    }
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Workflows whose lease expired and went back to the queue.
    pub requeued: Vec<String>,
    /// Canceled workflows whose agent never reported back.
    pub abandoned: Vec<String>,
    /// Agents dropped for missing health reports.
    pub dropped_agents: Vec<i64>,
    /// Finished workflows past the retention window.
    pub evicted: Vec<String>,
}

/// The workflow scheduler shared by every handler and [`LocalPeer`](crate::LocalPeer).
pub struct Hub {
    state: Mutex<HubState>,
    work_available: Notify,
    lease: Duration,
    agent_timeout: Duration,
    retention: Duration,
    max_log_lines: usize,
    max_timeout_secs: u64,
}

impl Hub {
    pub fn new(lease: Duration, agent_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            work_available: Notify::new(),
            lease,
            agent_timeout,
            retention: Duration::from_secs(defaults::RETENTION_SECS),
            max_log_lines: defaults::MAX_LOG_LINES,
            max_timeout_secs: defaults::MAX_TIMEOUT_SECS,
        }
    }

    /// Keep finished workflows queryable for `retention` before the sweep drops them.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Cap stored log lines per workflow.
    pub fn with_max_log_lines(mut self, lines: usize) -> Self {
        self.max_log_lines = lines;
        self
    }

    /// Reject submissions whose timeout exceeds `max`.
    pub fn with_max_timeout(mut self, max: Duration) -> Self {
        self.max_timeout_secs = max.as_secs();
        self
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    // ─── Admin ─────────────────────────────────────────────────────────────

    /// Queue a workflow; returns its id.
    pub fn submit(&self, request: SubmitRequest) -> Result<String> {
        let id = request
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if request.timeout > self.max_timeout_secs {
            return Err(PeerError::Rejected(format!(
                "workflow {id} timeout {}s exceeds the {}s maximum",
                request.timeout, self.max_timeout_secs
            )));
        }

        {
            let mut state = self.state.lock();
            if let Some(existing) = state.workflows.get(&id)
                && !existing.status.is_finished()
            {
                return Err(PeerError::Rejected(format!("workflow {id} is already active")));
            }

            let workflow = Workflow {
                id: id.clone(),
                config: request.config,
                timeout: request.timeout,
            };
            state
                .workflows
                .insert(id.clone(), Entry::new(workflow, request.labels));
            state.queue.push_back(id.clone());
        }

        info!(workflow_id = %id, "Workflow queued");
        self.work_available.notify_waiters();
        Ok(id)
    }

    /// Cancel a queued or running workflow.
    ///
    /// A queued workflow is finished on the spot. A running one is flagged
    /// and its `wait` callers learn `canceled = true`; it finishes when the
    /// agent reports `done`.
    pub fn cancel(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.entry_mut(id)?;
        match entry.status {
            WorkflowStatus::Queued => {
                entry.status = WorkflowStatus::Canceled;
                entry.state.canceled = true;
                entry.state.finished = unix_now();
                entry.finished_at = Some(Instant::now());
                entry.cancel_requested = true;
                entry.signal.send_replace(Signal::Canceled);
                state.queue.retain(|queued| queued != id);
                info!(workflow_id = %id, "Queued workflow canceled");
                Ok(())
            }
            WorkflowStatus::Running => {
                entry.cancel_requested = true;
                entry.signal.send_replace(Signal::Canceled);
                info!(workflow_id = %id, agent_id = ?entry.agent_id, "Running workflow canceled");
                Ok(())
            }
            _ => Err(PeerError::Rejected(format!("workflow {id} is already done"))),
        }
    }

    pub fn info(&self, id: &str) -> Result<WorkflowInfo> {
        Ok(self.state.lock().entry(id)?.info())
    }

    /// Log lines received for a workflow.
    pub fn logs(&self, id: &str) -> Result<Vec<LogEntry>> {
        Ok(self.state.lock().entry(id)?.logs.clone())
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Registered agents, by id.
    pub fn agents(&self) -> Vec<(i64, AgentInfo)> {
        let state = self.state.lock();
        let mut agents: Vec<_> = state
            .agents
            .iter()
            .map(|(id, agent)| (*id, agent.info.clone()))
            .collect();
        agents.sort_by_key(|(id, _)| *id);
        agents
    }

    // ─── Agent lifecycle ───────────────────────────────────────────────────

    pub fn register_agent(&self, info: AgentInfo) -> i64 {
        let mut state = self.state.lock();
        state.last_agent_id += 1;
        let id = state.last_agent_id;
        info!(
            agent_id = id,
            hostname = %info.hostname,
            backend = %info.backend,
            capacity = info.capacity,
            "Agent registered"
        );
        state.agents.insert(
            id,
            AgentEntry {
                info,
                last_seen: Instant::now(),
            },
        );
        id
    }

    pub fn unregister_agent(&self, agent_id: i64) {
        if self.state.lock().agents.remove(&agent_id).is_some() {
            info!(agent_id, "Agent unregistered");
        }
    }

    pub fn report_health(&self, agent_id: i64) -> Result<()> {
        let mut state = self.state.lock();
        match state.agents.get_mut(&agent_id) {
            Some(agent) => {
                agent.last_seen = Instant::now();
                Ok(())
            }
            None => Err(PeerError::Rejected(format!("unknown agent {agent_id}"))),
        }
    }

    // ─── Workflow protocol ─────────────────────────────────────────────────

    /// Assign the oldest queued workflow matching `filter`, waiting up to
    /// `window` for one to arrive.
    pub async fn next(
        &self,
        agent: Option<i64>,
        filter: &Filter,
        window: Duration,
    ) -> Result<Option<Workflow>> {
        let deadline = Instant::now() + window;
        loop {
            let notified = self.work_available.notified();
            tokio::pin!(notified);
            // Register before checking the queue so a concurrent submit is not missed.
            notified.as_mut().enable();

            if let Some(workflow) = self.state.lock().assign(agent, filter, self.lease) {
                info!(workflow_id = %workflow.id, agent_id = ?agent, "Workflow assigned");
                return Ok(Some(workflow));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    pub fn init(&self, id: &str, agent: Option<i64>, update: WorkflowState) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.entry_mut(id)?;
        entry.check_assigned(id, agent)?;
        entry.state.started = if update.started != 0 {
            update.started
        } else {
            unix_now()
        };
        entry.deadline = Some(Instant::now() + self.lease);
        debug!(workflow_id = %id, "Workflow initialized");
        Ok(())
    }

    /// Wait up to `window` for the workflow to finish or be canceled.
    ///
    /// `Some(true)` iff the server canceled it; `None` if still running.
    pub async fn wait(&self, id: &str, window: Duration) -> Result<Option<bool>> {
        let mut signal = self.state.lock().entry(id)?.signal.subscribe();
        match tokio::time::timeout(window, signal.wait_for(|s| *s != Signal::Pending)).await {
            Err(_) => Ok(None),
            Ok(Ok(value)) => Ok(Some(*value == Signal::Canceled)),
            // The channel was replaced by a requeue.
            Ok(Err(_)) => Ok(Some(true)),
        }
    }

    pub fn done(&self, id: &str, agent: Option<i64>, update: WorkflowState) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.entry_mut(id)?;
        entry.check_assigned(id, agent)?;

        let canceled = update.canceled || entry.cancel_requested;
        if update.started != 0 {
            entry.state.started = update.started;
        }
        entry.state.finished = if update.finished != 0 {
            update.finished
        } else {
            unix_now()
        };
        entry.state.error = update.error;
        entry.state.canceled = canceled;
        entry.status = if canceled {
            WorkflowStatus::Canceled
        } else if entry.state.error.is_some() {
            WorkflowStatus::Failure
        } else {
            WorkflowStatus::Success
        };
        entry.deadline = None;
        entry.finished_at = Some(Instant::now());
        if !entry.cancel_requested {
            entry.signal.send_replace(Signal::Finished);
        }

        info!(
            workflow_id = %id,
            status = ?entry.status,
            error = entry.state.error.as_deref().unwrap_or(""),
            "Workflow done"
        );
        Ok(())
    }

    pub fn extend(&self, id: &str, agent: Option<i64>) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.entry_mut(id)?;
        entry.check_assigned(id, agent)?;
        entry.deadline = Some(Instant::now() + self.lease);
        Ok(())
    }

    /// Record a step report, merged per step UUID.
    pub fn update(&self, id: &str, agent: Option<i64>, step: StepState) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.entry_mut(id)?;
        check_agent(entry, id, agent)?;

        match entry.steps.get_mut(&step.step_uuid) {
            Some(existing) => {
                let started = existing.started;
                *existing = step;
                if existing.started == 0 {
                    existing.started = started;
                }
            }
            None => {
                entry.steps.insert(step.step_uuid.clone(), step);
            }
        }
        Ok(())
    }

    /// Store log lines; lines for unknown workflows, or past the per-workflow
    /// cap, are dropped.
    pub fn append_logs(&self, entries: Vec<LogEntry>) -> usize {
        let mut state = self.state.lock();
        let mut accepted = 0;
        for log in entries {
            match state.workflows.get_mut(&log.workflow_id) {
                Some(entry) if entry.logs.len() >= self.max_log_lines => {
                    if entry.dropped_logs == 0 {
                        warn!(
                            workflow_id = %log.workflow_id,
                            max_log_lines = self.max_log_lines,
                            "Log line cap reached, dropping further lines"
                        );
                    }
                    entry.dropped_logs += 1;
                }
                Some(entry) => {
                    entry.logs.push(log);
                    accepted += 1;
                }
                None => debug!(workflow_id = %log.workflow_id, "Dropping log for unknown workflow"),
            }
        }
        accepted
    }

    // ─── Housekeeping ──────────────────────────────────────────────────────

    /// Requeue expired leases, drop silent agents and evict finished
    /// workflows past retention, as of `now`.
    pub fn sweep_at(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let mut state = self.state.lock();

        let agent_timeout = self.agent_timeout;
        state.agents.retain(|id, agent| {
            let alive = now.saturating_duration_since(agent.last_seen) < agent_timeout;
            if !alive {
                report.dropped_agents.push(*id);
            }
            alive
        });

        let expired: Vec<String> = state
            .workflows
            .iter()
            .filter(|(_, entry)| {
                entry.status == WorkflowStatus::Running
                    && entry.deadline.is_some_and(|deadline| deadline <= now)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            let Some(entry) = state.workflows.get_mut(&id) else {
                continue;
            };
            let previous_agent = entry.agent_id.take();
            entry.deadline = None;

            if entry.cancel_requested {
                entry.status = WorkflowStatus::Canceled;
                entry.state.canceled = true;
                entry.state.finished = unix_now();
                entry.finished_at = Some(now);
                warn!(workflow_id = %id, agent_id = ?previous_agent, "Canceled workflow abandoned by agent");
                report.abandoned.push(id);
                continue;
            }

            entry.status = WorkflowStatus::Queued;
            entry.requeues += 1;
            // Waiters from the lost assignment see a cancellation.
            entry.signal.send_replace(Signal::Canceled);
            entry.signal = watch::channel(Signal::Pending).0;
            warn!(workflow_id = %id, agent_id = ?previous_agent, "Lease expired, requeueing workflow");
            state.queue.push_front(id.clone());
            report.requeued.push(id);
        }

        let retention = self.retention;
        state.workflows.retain(|id, entry| {
            let keep = entry
                .finished_at
                .is_none_or(|at| now.saturating_duration_since(at) < retention);
            if !keep {
                report.evicted.push(id.clone());
            }
            keep
        });
        drop(state);

        if !report.requeued.is_empty() {
            self.work_available.notify_waiters();
        }
        for id in &report.dropped_agents {
            warn!(agent_id = id, "Agent missed health reports, dropping");
        }
        if !report.evicted.is_empty() {
            debug!(evicted = report.evicted.len(), "Evicted finished workflows");
        }
        report
    }

    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now())
    }

    /// Sweep every `interval` until `shutdown` fires.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep();
                }
            }
        }
        debug!("Sweeper stopped");
    }
}

//! Live agent activity counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters shared by every slot of one agent.
///
/// Passed around explicitly; there is no process-wide instance.
#[derive(Debug, Default)]
pub struct AgentCounters {
    polling: AtomicUsize,
    running_workflows: AtomicUsize,
    running_steps: AtomicUsize,
    completed: AtomicUsize,
}

/// Point-in-time copy of [`AgentCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub polling: usize,
    pub running_workflows: usize,
    pub running_steps: usize,
    pub completed: usize,
}

/// Which gauge a [`CounterGuard`] holds.
#[derive(Debug, Clone, Copy)]
enum Gauge {
    Polling,
    RunningWorkflows,
    RunningSteps,
}

/// Decrements its gauge on drop.
#[must_use]
pub struct CounterGuard {
    counters: Arc<AgentCounters>,
    gauge: Gauge,
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.counters.gauge(self.gauge).fetch_sub(1, Ordering::SeqCst);
    }
}

impl AgentCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn gauge(&self, gauge: Gauge) -> &AtomicUsize {
        match gauge {
            Gauge::Polling => &self.polling,
            Gauge::RunningWorkflows => &self.running_workflows,
            Gauge::RunningSteps => &self.running_steps,
        }
    }

    fn hold(self: &Arc<Self>, gauge: Gauge) -> CounterGuard {
        self.gauge(gauge).fetch_add(1, Ordering::SeqCst);
        CounterGuard {
            counters: Arc::clone(self),
            gauge,
        }
    }

    /// Count a slot blocked in `next`.
    pub fn polling(self: &Arc<Self>) -> CounterGuard {
        self.hold(Gauge::Polling)
    }

    pub fn running_workflow(self: &Arc<Self>) -> CounterGuard {
        self.hold(Gauge::RunningWorkflows)
    }

    pub fn step_started(&self) {
        self.running_steps.fetch_add(1, Ordering::SeqCst);
    }

    pub fn step_finished(&self) {
        // Never underflow when a finished event arrives without its start.
        let _ = self
            .running_steps
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn workflow_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            polling: self.polling.load(Ordering::SeqCst),
            running_workflows: self.running_workflows.load(Ordering::SeqCst),
            running_steps: self.running_steps.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
        }
    }
}

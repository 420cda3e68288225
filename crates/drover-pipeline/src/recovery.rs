//! Per-workflow recovery decisions.
//!
//! A [`RecoveryManager`] caches the store's view of every step at the start of
//! a run and answers, per step, whether to execute it, reconnect to a copy
//! that may still be running, or skip it because it already finished.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use drover_types::{Config, RecoveryState, RecoveryStatus, Step};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::SharedStateStore;

/// Recovery bookkeeping for one workflow run.
///
/// A disabled manager is a no-op on every method, so the runtime can call
/// it unconditionally.
pub struct RecoveryManager {
    store: Option<SharedStateStore>,
    workflow_id: String,
    enabled: AtomicBool,
    cache: Mutex<HashMap<String, RecoveryState>>,
    canceled: AtomicBool,
}

impl RecoveryManager {
    pub fn new(store: SharedStateStore, workflow_id: impl Into<String>, enabled: bool) -> Self {
        Self {
            store: Some(store),
            workflow_id: workflow_id.into(),
            enabled: AtomicBool::new(enabled),
            cache: Mutex::new(HashMap::new()),
            canceled: AtomicBool::new(false),
        }
    }

    /// A manager that never touches a store.
    pub fn disabled() -> Self {
        Self {
            store: None,
            workflow_id: String::new(),
            enabled: AtomicBool::new(false),
            cache: Mutex::new(HashMap::new()),
            canceled: AtomicBool::new(false),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some() && self.enabled.load(Ordering::SeqCst)
    }

    /// Turn recovery off for the rest of the run.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn store(&self) -> Option<&SharedStateStore> {
        if self.is_enabled() {
            self.store.as_ref()
        } else {
            None
        }
    }

    /// Load (or create) records for every step of `config` and cache them.
    ///
    /// A store failure disables recovery for the rest of the run and is
    /// returned unchanged; there is no fallback to an empty state.
    pub async fn init_recovery_state(
        &self,
        config: &Config,
        timeout_secs: u64,
    ) -> Result<(), StoreError> {
        let Some(store) = self.store() else {
            return Ok(());
        };

        let uuids = config.step_uuids();
        match store.init(&self.workflow_id, &uuids, timeout_secs).await {
            Ok(states) => {
                debug!(
                    workflow_id = %self.workflow_id,
                    steps = states.len(),
                    "Recovery state initialized"
                );
                *self.cache.lock() = states;
                Ok(())
            }
            Err(e) => {
                warn!(
                    workflow_id = %self.workflow_id,
                    error = %e,
                    "Failed to initialize recovery state, disabling recovery"
                );
                self.disable();
                Err(e)
            }
        }
    }

    /// Cached state of `step`; unknown steps are `Pending`.
    pub fn get_step_state(&self, step: &Step) -> RecoveryState {
        self.cache
            .lock()
            .get(&step.uuid)
            .cloned()
            .unwrap_or_default()
    }

    /// `(true, state)` iff the step already reached a terminal status.
    pub fn should_skip_step(&self, step: &Step) -> (bool, Option<RecoveryState>) {
        if !self.is_enabled() {
            return (false, None);
        }
        let state = self.get_step_state(step);
        (state.status.is_terminal(), Some(state))
    }

    /// Whether a previous run left the step `Running`.
    pub fn should_reconnect(state: Option<&RecoveryState>) -> bool {
        state.is_some_and(|s| s.status == RecoveryStatus::Running)
    }

    pub async fn mark_step_running(&self, step: &Step) -> Result<(), StoreError> {
        self.mark(step, RecoveryStatus::Running, 0).await
    }

    pub async fn mark_step_success(&self, step: &Step) -> Result<(), StoreError> {
        self.mark(step, RecoveryStatus::Success, 0).await
    }

    pub async fn mark_step_failed(&self, step: &Step, exit_code: i32) -> Result<(), StoreError> {
        self.mark(step, RecoveryStatus::Failed, exit_code).await
    }

    pub async fn mark_step_skipped(&self, step: &Step) -> Result<(), StoreError> {
        self.mark(step, RecoveryStatus::Skipped, 0).await
    }

    async fn mark(
        &self,
        step: &Step,
        status: RecoveryStatus,
        exit_code: i32,
    ) -> Result<(), StoreError> {
        let Some(store) = self.store() else {
            return Ok(());
        };
        if step.uuid.is_empty() {
            return Ok(());
        }

        store
            .update(&self.workflow_id, &step.uuid, status, exit_code)
            .await?;

        self.cache
            .lock()
            .entry(step.uuid.clone())
            .or_default()
            .apply(status, exit_code, chrono::Utc::now());
        Ok(())
    }

    /// Record a user-initiated cancellation.
    pub fn set_canceled(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Whether an aborted run should be left for another agent to resume.
    ///
    /// True only once `token` is cancelled, recovery is on, and nobody
    /// called [`set_canceled`](Self::set_canceled).
    pub fn is_recoverable(&self, token: &CancellationToken) -> bool {
        token.is_cancelled() && self.is_enabled() && !self.is_canceled()
    }

    /// Drop the workflow's records once it is done for good.
    pub async fn delete(&self) -> Result<(), StoreError> {
        match &self.store {
            Some(store) if !self.workflow_id.is_empty() => store.delete(&self.workflow_id).await,
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("workflow_id", &self.workflow_id)
            .field("enabled", &self.is_enabled())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryBackend, StateStore, VersionedStateStore};
    use drover_types::Stage;
    use std::sync::Arc;

    fn step(uuid: &str) -> Step {
        Step::new(uuid, "alpine").with_uuid(uuid)
    }

    fn config(uuids: &[&str]) -> Config {
        Config::new(vec![Stage::new(
            "main",
            uuids.iter().map(|u| step(u)).collect(),
        )])
    }

    fn store() -> Arc<VersionedStateStore<MemoryBackend>> {
        Arc::new(VersionedStateStore::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn test_round_trip_through_store() {
        let store = store();
        let ids: Vec<String> = ["u1", "u2", "u3"].iter().map(|s| s.to_string()).collect();
        store.init("wf", &ids, 60).await.unwrap();
        store
            .update("wf", "u2", RecoveryStatus::Running, 0)
            .await
            .unwrap();
        store
            .update("wf", "u3", RecoveryStatus::Success, 0)
            .await
            .unwrap();

        let manager = RecoveryManager::new(store, "wf", true);
        manager
            .init_recovery_state(&config(&["u1", "u2", "u3"]), 60)
            .await
            .unwrap();

        assert_eq!(
            manager.get_step_state(&step("u1")).status,
            RecoveryStatus::Pending
        );
        assert_eq!(
            manager.get_step_state(&step("u2")).status,
            RecoveryStatus::Running
        );
        assert_eq!(
            manager.get_step_state(&step("u3")).status,
            RecoveryStatus::Success
        );
        assert_eq!(
            manager.get_step_state(&step("unknown")).status,
            RecoveryStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_should_skip_only_terminal() {
        let store = store();
        let manager = RecoveryManager::new(store, "wf", true);
        manager
            .init_recovery_state(&config(&["p", "r", "s", "f", "k"]), 60)
            .await
            .unwrap();

        manager.mark_step_running(&step("r")).await.unwrap();
        manager.mark_step_success(&step("s")).await.unwrap();
        manager.mark_step_failed(&step("f"), 2).await.unwrap();
        manager.mark_step_skipped(&step("k")).await.unwrap();

        assert!(!manager.should_skip_step(&step("p")).0);
        assert!(!manager.should_skip_step(&step("r")).0);
        assert!(manager.should_skip_step(&step("s")).0);
        assert!(manager.should_skip_step(&step("k")).0);

        let (skip, state) = manager.should_skip_step(&step("f"));
        assert!(skip);
        assert_eq!(state.unwrap().exit_code, 2);
    }

    #[test]
    fn test_should_reconnect() {
        assert!(!RecoveryManager::should_reconnect(None));
        for status in [
            RecoveryStatus::Pending,
            RecoveryStatus::Success,
            RecoveryStatus::Failed,
            RecoveryStatus::Skipped,
        ] {
            let state = RecoveryState::with_status(status);
            assert!(!RecoveryManager::should_reconnect(Some(&state)));
        }
        let running = RecoveryState::with_status(RecoveryStatus::Running);
        assert!(RecoveryManager::should_reconnect(Some(&running)));
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let manager = RecoveryManager::disabled();
        manager
            .init_recovery_state(&config(&["a"]), 60)
            .await
            .unwrap();
        manager.mark_step_failed(&step("a"), 1).await.unwrap();
        assert_eq!(manager.should_skip_step(&step("a")), (false, None));

        let store = store();
        let manager = RecoveryManager::new(store.clone(), "wf", false);
        manager
            .init_recovery_state(&config(&["a"]), 60)
            .await
            .unwrap();
        assert!(matches!(store.get("wf").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_is_recoverable() {
        let manager = RecoveryManager::new(store(), "wf", true);
        let token = CancellationToken::new();
        assert!(!manager.is_recoverable(&token));

        token.cancel();
        assert!(manager.is_recoverable(&token));

        manager.set_canceled();
        assert!(!manager.is_recoverable(&token));

        let disabled = RecoveryManager::new(store(), "wf", false);
        assert!(!disabled.is_recoverable(&token));
    }

    #[tokio::test]
    async fn test_mark_errors_surface_and_leave_cache() {
        let manager = RecoveryManager::new(store(), "never-initialized", true);
        let err = manager.mark_step_running(&step("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(
            manager.get_step_state(&step("a")).status,
            RecoveryStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_delete_removes_records() {
        let store = store();
        let manager = RecoveryManager::new(store.clone(), "wf", true);
        manager
            .init_recovery_state(&config(&["a"]), 60)
            .await
            .unwrap();
        manager.delete().await.unwrap();
        assert!(store.get("wf").await.is_err());
    }
}

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_types::{RecoveryState, RecoveryStatus};
use tracing::{debug, info};

use super::{RecordBackend, StateStore, WorkflowRecord};
use crate::error::StoreError;

/// Default number of read-modify-write attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default pause between conflicting attempts, multiplied by the attempt number.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// TTL applied when `init` is called with a zero timeout.
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Longest TTL a record gets; larger timeouts are clamped.
pub const MAX_TTL_SECS: u64 = 366 * 24 * 3600;

/// [`StateStore`] over a versioned document per workflow.
pub struct VersionedStateStore<B> {
    backend: B,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl<B: RecordBackend> VersionedStateStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Set the conflict retry policy.
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Read-modify-write with conflict retry.
    async fn modify<F>(&self, workflow_id: &str, mut apply: F) -> Result<WorkflowRecord, StoreError>
    where
        F: FnMut(Option<WorkflowRecord>, DateTime<Utc>) -> Result<WorkflowRecord, StoreError>
            + Send,
    {
        for attempt in 1..=self.max_attempts {
            let current = self.backend.load(workflow_id).await?;
            let expected = current.as_ref().map(|r| r.version);

            let mut next = apply(current, Utc::now())?;
            next.version = expected.map_or(1, |v| v + 1);

            if self
                .backend
                .compare_and_swap(workflow_id, expected, next.clone())
                .await?
            {
                return Ok(next);
            }

            debug!(
                workflow_id,
                attempt,
                max_attempts = self.max_attempts,
                "Recovery record changed concurrently, retrying"
            );
            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_backoff * attempt).await;
            }
        }

        Err(StoreError::Conflict {
            workflow_id: workflow_id.to_string(),
            attempts: self.max_attempts,
        })
    }
}

#[async_trait]
impl<B: RecordBackend> StateStore for VersionedStateStore<B> {
    async fn init(
        &self,
        workflow_id: &str,
        step_uuids: &[String],
        timeout_secs: u64,
    ) -> Result<HashMap<String, RecoveryState>, StoreError> {
        let ttl_secs = match timeout_secs {
            0 => DEFAULT_TTL_SECS,
            secs => secs.min(MAX_TTL_SECS),
        };
        let ttl = i64::try_from(ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or(StoreError::InvalidTtl(timeout_secs))?;

        let record = self
            .modify(workflow_id, |current, now| {
                let previous = current
                    .filter(|record| !record.is_expired(now))
                    .map(|record| record.steps)
                    .unwrap_or_default();

                let steps = step_uuids
                    .iter()
                    .map(|uuid| {
                        let state = previous.get(uuid).cloned().unwrap_or_default();
                        (uuid.clone(), state)
                    })
                    .collect();

                let expires_at = now
                    .checked_add_signed(ttl)
                    .ok_or(StoreError::InvalidTtl(timeout_secs))?;
                Ok(WorkflowRecord {
                    version: 0,
                    expires_at,
                    steps,
                })
            })
            .await?;

        Ok(record.steps)
    }

    async fn update(
        &self,
        workflow_id: &str,
        step_uuid: &str,
        status: RecoveryStatus,
        exit_code: i32,
    ) -> Result<(), StoreError> {
        self.modify(workflow_id, |current, now| {
            let mut record =
                current.ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
            let entry = record.steps.entry(step_uuid.to_string()).or_default();
            if !entry.status.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    step_uuid: step_uuid.to_string(),
                    from: entry.status,
                    to: status,
                });
            }
            entry.apply(status, exit_code, now);
            Ok(record)
        })
        .await?;
        Ok(())
    }

    async fn get(&self, workflow_id: &str) -> Result<HashMap<String, RecoveryState>, StoreError> {
        self.backend
            .load(workflow_id)
            .await?
            .map(|record| record.steps)
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))
    }

    async fn delete(&self, workflow_id: &str) -> Result<(), StoreError> {
        self.backend.remove(workflow_id).await
    }

    async fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut removed = 0;
        for workflow_id in self.backend.list().await? {
            let expired = self
                .backend
                .load(&workflow_id)
                .await?
                .is_some_and(|record| record.is_expired(now));
            if expired {
                self.backend.remove(&workflow_id).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Removed expired recovery records");
        }
        Ok(removed)
    }
}

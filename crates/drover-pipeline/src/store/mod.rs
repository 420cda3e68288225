//! Recovery state storage.
//!
//! [`StateStore`] is the contract the [`RecoveryManager`](crate::RecoveryManager)
//! consumes. [`VersionedStateStore`] implements it over any [`RecordBackend`]
//! holding one versioned document per workflow, with compare-and-swap writes so
//! agents racing on the same record retry instead of clobbering each other.

mod file;
mod memory;
mod versioned;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_types::{RecoveryState, RecoveryStatus};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use versioned::VersionedStateStore;

/// Keyed store of per-step recovery records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Initialize (or fetch existing) records for exactly `step_uuids`.
    async fn init(
        &self,
        workflow_id: &str,
        step_uuids: &[String],
        timeout_secs: u64,
    ) -> Result<HashMap<String, RecoveryState>, StoreError>;

    /// Transition one step's record.
    async fn update(
        &self,
        workflow_id: &str,
        step_uuid: &str,
        status: RecoveryStatus,
        exit_code: i32,
    ) -> Result<(), StoreError>;

    async fn get(&self, workflow_id: &str) -> Result<HashMap<String, RecoveryState>, StoreError>;

    async fn delete(&self, workflow_id: &str) -> Result<(), StoreError>;

    /// Drop records whose TTL has passed; returns how many workflows were removed.
    async fn cleanup_expired(&self) -> Result<usize, StoreError>;
}

/// Shared, dynamically dispatched store.
pub type SharedStateStore = Arc<dyn StateStore>;

/// The versioned document kept per workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub version: u64,
    pub expires_at: DateTime<Utc>,
    pub steps: HashMap<String, RecoveryState>,
}

impl WorkflowRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Raw document storage with compare-and-swap.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    async fn load(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>, StoreError>;

    /// Store `record` iff the current version equals `expected`
    /// (`None` = no record may exist). Returns `false` on a version conflict.
    async fn compare_and_swap(
        &self,
        workflow_id: &str,
        expected: Option<u64>,
        record: WorkflowRecord,
    ) -> Result<bool, StoreError>;

    async fn remove(&self, workflow_id: &str) -> Result<(), StoreError>;

    /// Ids of every stored workflow.
    async fn list(&self) -> Result<Vec<String>, StoreError>;
}

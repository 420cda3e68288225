use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{RecordBackend, WorkflowRecord};
use crate::error::StoreError;

/// In-process record storage. Does not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, WorkflowRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl RecordBackend for MemoryBackend {
    async fn load(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>, StoreError> {
        Ok(self.records.lock().get(workflow_id).cloned())
    }

    async fn compare_and_swap(
        &self,
        workflow_id: &str,
        expected: Option<u64>,
        record: WorkflowRecord,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.lock();
        let current = records.get(workflow_id).map(|r| r.version);
        if current != expected {
            return Ok(false);
        }
        records.insert(workflow_id.to_string(), record);
        Ok(true)
    }

    async fn remove(&self, workflow_id: &str) -> Result<(), StoreError> {
        self.records.lock().remove(workflow_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(version: u64) -> WorkflowRecord {
        WorkflowRecord {
            version,
            expires_at: Utc::now(),
            steps: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_version() {
        let backend = MemoryBackend::new();
        assert!(backend.compare_and_swap("w1", None, record(1)).await.unwrap());
        assert!(!backend.compare_and_swap("w1", None, record(1)).await.unwrap());
        assert!(!backend.compare_and_swap("w1", Some(7), record(8)).await.unwrap());
        assert!(backend.compare_and_swap("w1", Some(1), record(2)).await.unwrap());
        assert_eq!(backend.load("w1").await.unwrap().unwrap().version, 2);
    }
}

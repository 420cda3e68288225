use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use super::{RecordBackend, WorkflowRecord};
use crate::error::StoreError;

const EXTENSION: &str = "json";
const LOCK_EXTENSION: &str = "lock";
const LOCK_RETRY: Duration = Duration::from_millis(10);

/// How long a writer waits on another's record lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Lock files older than this are left over from a crashed writer.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

/// One JSON document per workflow under a state directory.
///
/// Writes go to a temporary file that is renamed over the record, so a crash
/// mid-write leaves the previous version intact. Compare-and-swap holds a
/// per-record lock file, so several processes may share one directory.
/// File names are the hex-encoded workflow id.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    lock_timeout: Duration,
}

/// Removes the lock file when dropped.
struct RecordLock {
    path: PathBuf,
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release record lock");
        }
    }
}

impl FileBackend {
    /// Open (creating if needed) a state directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, workflow_id: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("{}.{extension}", hex::encode(workflow_id)))
    }

    async fn read(&self, path: &Path) -> Result<Option<WorkflowRecord>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Take the record's lock file, clearing it if a crashed writer left it.
    async fn lock(&self, workflow_id: &str) -> Result<RecordLock, StoreError> {
        let path = self.path_for(workflow_id, LOCK_EXTENSION);
        let started = Instant::now();
        loop {
            let created = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match created {
                Ok(_) => return Ok(RecordLock { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&path).await {
                        warn!(workflow_id, "Removing stale record lock");
                        let _ = tokio::fs::remove_file(&path).await;
                        continue;
                    }
                    if started.elapsed() >= self.lock_timeout {
                        return Err(StoreError::Locked(workflow_id.to_string()));
                    }
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn write(&self, path: &Path, record: &WorkflowRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        let written = match tokio::fs::write(&tmp, bytes).await {
            Ok(()) => tokio::fs::rename(&tmp, path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

async fn is_stale(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .and_then(|meta| meta.modified())
        .is_ok_and(|modified| {
            modified
                .elapsed()
                .is_ok_and(|age| age > STALE_LOCK_AGE)
        })
}

#[async_trait]
impl RecordBackend for FileBackend {
    async fn load(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>, StoreError> {
        self.read(&self.path_for(workflow_id, EXTENSION)).await
    }

    async fn compare_and_swap(
        &self,
        workflow_id: &str,
        expected: Option<u64>,
        record: WorkflowRecord,
    ) -> Result<bool, StoreError> {
        let path = self.path_for(workflow_id, EXTENSION);
        let _lock = self.lock(workflow_id).await?;

        let current = self.read(&path).await?.map(|r| r.version);
        if current != expected {
            return Ok(false);
        }
        self.write(&path, &record).await?;
        Ok(true)
    }

    async fn remove(&self, workflow_id: &str) -> Result<(), StoreError> {
        let _lock = self.lock(workflow_id).await?;
        match tokio::fs::remove_file(self.path_for(workflow_id, EXTENSION)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|stem| hex::decode(stem).ok())
                .and_then(|bytes| String::from_utf8(bytes).ok());
            match id {
                Some(id) => ids.push(id),
                None => warn!(path = %path.display(), "Ignoring unrecognized file in state dir"),
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StateStore, VersionedStateStore};
    use chrono::Utc;
    use drover_types::RecoveryStatus;
    use std::collections::HashMap;

    fn record(version: u64) -> WorkflowRecord {
        WorkflowRecord {
            version,
            expires_at: Utc::now(),
            steps: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = FileBackend::open(dir.path()).await.unwrap();
            assert!(backend.compare_and_swap("wf-1", None, record(1)).await.unwrap());
        }
        let backend = FileBackend::open(dir.path()).await.unwrap();
        assert_eq!(backend.load("wf-1").await.unwrap().unwrap().version, 1);
        assert_eq!(backend.list().await.unwrap(), vec!["wf-1".to_string()]);
    }

    #[tokio::test]
    async fn test_cas_conflict_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).await.unwrap();
        assert!(backend.compare_and_swap("wf", None, record(1)).await.unwrap());
        assert!(!backend.compare_and_swap("wf", Some(3), record(4)).await.unwrap());

        backend.remove("wf").await.unwrap();
        backend.remove("wf").await.unwrap();
        assert!(backend.load("wf").await.unwrap().is_none());
        assert!(backend.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ids_map_to_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).await.unwrap();
        assert!(backend.compare_and_swap("a/b", None, record(1)).await.unwrap());
        assert!(backend.compare_and_swap("a_b", None, record(7)).await.unwrap());

        assert_eq!(backend.load("a/b").await.unwrap().unwrap().version, 1);
        assert_eq!(backend.load("a_b").await.unwrap().unwrap().version, 7);
        let mut ids = backend.list().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a/b".to_string(), "a_b".to_string()]);
    }

    #[tokio::test]
    async fn test_held_lock_blocks_writers() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path())
            .await
            .unwrap()
            .with_lock_timeout(Duration::from_millis(50));
        let lock = backend.path_for("wf", LOCK_EXTENSION);
        std::fs::write(&lock, b"").unwrap();

        let err = backend
            .compare_and_swap("wf", None, record(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Locked(id) if id == "wf"));
        assert!(backend.load("wf").await.unwrap().is_none());

        std::fs::remove_file(&lock).unwrap();
        assert!(backend.compare_and_swap("wf", None, record(1)).await.unwrap());
        assert!(!lock.exists());
    }

    async fn mark_success(store: &VersionedStateStore<FileBackend>, steps: &[String]) {
        for step in steps {
            store
                .update("wf", step, RecoveryStatus::Success, 0)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_two_backends_on_one_dir_lose_no_updates() {
        let dir = tempfile::tempdir().unwrap();
        let first = VersionedStateStore::new(FileBackend::open(dir.path()).await.unwrap())
            .with_retry(50, Duration::from_millis(1));
        let second = VersionedStateStore::new(FileBackend::open(dir.path()).await.unwrap())
            .with_retry(50, Duration::from_millis(1));
        let steps: Vec<String> = (0..8).map(|n| format!("s{n}")).collect();
        first.init("wf", &steps, 60).await.unwrap();

        tokio::join!(
            mark_success(&first, &steps[..4]),
            mark_success(&second, &steps[4..])
        );

        let states = second.get("wf").await.unwrap();
        assert_eq!(states.len(), 8);
        assert!(states.values().all(|s| s.status == RecoveryStatus::Success));
    }
}

//! Recovery store selection.

use std::sync::Arc;

use drover_config::{RecoveryConfig, StoreKind};
use drover_pipeline::{FileBackend, MemoryBackend, SharedStateStore, VersionedStateStore};
use tracing::info;

use crate::error::Result;

/// Open the configured recovery store; `None` when recovery is disabled.
pub async fn open_store(config: &RecoveryConfig) -> Result<Option<SharedStateStore>> {
    if !config.enabled {
        return Ok(None);
    }

    let store: SharedStateStore = match config.store {
        StoreKind::Memory => {
            info!("Using in-memory recovery store");
            Arc::new(VersionedStateStore::new(MemoryBackend::new()))
        }
        StoreKind::File => {
            let dir = config.resolved_state_dir();
            info!(dir = %dir.display(), "Using file recovery store");
            Arc::new(VersionedStateStore::new(FileBackend::open(dir).await?))
        }
    };
    Ok(Some(store))
}

//! Execution backends available to the agent.

mod local;

use std::path::Path;
use std::sync::Arc;

use drover_pipeline::SharedEngine;

use crate::error::{AgentError, Result};

pub use local::LocalEngine;

/// Backend names accepted by [`create`].
pub const BACKENDS: &[&str] = &[local::NAME];

/// Build the engine registered under `name`.
pub fn create(name: &str, workdir: &Path) -> Result<SharedEngine> {
    match name {
        local::NAME => Ok(Arc::new(LocalEngine::new(workdir))),
        other => Err(AgentError::UnknownBackend(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_known_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create("local", dir.path()).unwrap();
        assert_eq!(engine.name(), "local");

        let err = create("kubernetes", dir.path()).err().unwrap();
        assert!(matches!(err, AgentError::UnknownBackend(name) if name == "kubernetes"));
    }
}

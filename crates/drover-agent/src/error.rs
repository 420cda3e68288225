//! Agent error types.

use drover_pipeline::StoreError;
use drover_types::PeerError;
use thiserror::Error;

/// Errors that stop an agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The server refused or could not be reached fatally.
    #[error(transparent)]
    Peer(#[from] PeerError),

    /// No backend is registered under this name.
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// Opening the recovery store failed.
    #[error("Recovery store: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

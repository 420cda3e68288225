//! Protocol error types.

use thiserror::Error;

/// Result type for `Peer` operations.
pub type Result<T> = std::result::Result<T, PeerError>;

/// Errors surfaced by a `Peer` implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    /// Transport failure; the caller should retry with backoff.
    #[error("Server unavailable: {0}")]
    Unavailable(String),

    /// Server speaks an incompatible protocol revision; fatal.
    #[error("Protocol version mismatch: agent speaks {agent}, server speaks {server}")]
    VersionMismatch { agent: u32, server: u32 },

    /// The referenced workflow is unknown to the server.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// The server rejected the agent's credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The request was understood but refused (e.g. a second `done`).
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PeerError {
    /// Returns true for transport failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Returns true for errors that must stop the agent.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::VersionMismatch { .. } | Self::Unauthorized(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(PeerError::Unavailable("connection refused".into()).is_retryable());
        assert!(!PeerError::WorkflowNotFound("w1".into()).is_retryable());
        assert!(PeerError::VersionMismatch { agent: 1, server: 2 }.is_fatal());
        assert!(!PeerError::Rejected("done twice".into()).is_fatal());
    }
}

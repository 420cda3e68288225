//! Client error types.

use drover_types::PeerError;
use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server returned an error response.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error code from server.
        code: String,
        /// Error message from server.
        message: String,
    },

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_)) || matches!(self, Error::Api { status: 404, .. })
    }

    /// Check if this is an authentication error.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth(_)) || matches!(self, Error::Api { status: 401, .. })
    }

    /// Check if this is a server error.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Api { status, .. } if *status >= 500)
    }

    /// Classify into the protocol taxonomy, naming `workflow_id` for 404s.
    pub fn into_peer(self, workflow_id: &str) -> PeerError {
        match self {
            Error::NotFound(_) => PeerError::WorkflowNotFound(workflow_id.to_string()),
            other => other.into(),
        }
    }
}

impl From<Error> for PeerError {
    fn from(e: Error) -> Self {
        match e {
            Error::Http(ref err) if err.is_decode() => PeerError::Internal(e.to_string()),
            // Connect, timeout and body errors are all transport failures.
            Error::Http(err) => PeerError::Unavailable(err.to_string()),
            Error::Auth(message) => PeerError::Unauthorized(message),
            Error::NotFound(message) => PeerError::WorkflowNotFound(message),
            Error::Api {
                status: 502..=504,
                message,
                ..
            } => PeerError::Unavailable(message),
            Error::Api {
                status: 400 | 409,
                message,
                ..
            } => PeerError::Rejected(message),
            Error::Api { message, .. } => PeerError::Internal(message),
            Error::InvalidUrl(_) | Error::Json(_) | Error::Config(_) => {
                PeerError::Internal(e.to_string())
            }
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> Error {
        Error::Api {
            status,
            code: "x".into(),
            message: "m".into(),
        }
    }

    #[test]
    fn test_peer_classification() {
        assert!(PeerError::from(api(503)).is_retryable());
        assert!(matches!(PeerError::from(api(409)), PeerError::Rejected(_)));
        assert!(matches!(PeerError::from(api(500)), PeerError::Internal(_)));
        assert!(PeerError::from(Error::Auth("bad".into())).is_fatal());
        assert_eq!(
            Error::NotFound("Not found: workflow w1".into()).into_peer("w1"),
            PeerError::WorkflowNotFound("w1".into())
        );
    }
}

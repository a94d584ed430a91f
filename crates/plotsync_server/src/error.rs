//! Error types for the sync server.

use plotsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing, malformed, expired or mismatched token.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Another device wrote after the client's known version.
    #[error("version conflict: server at {server_version}, client at {client_version}")]
    VersionConflict {
        /// Current server version for the project.
        server_version: u64,
        /// Version the client sent.
        client_version: u64,
    },

    /// No handler for the path.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::AuthenticationFailed(_) => 401,
            ServerError::UnknownEndpoint(_) => 404,
            ServerError::VersionConflict { .. } => 409,
            ServerError::Internal(_) => 500,
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        ServerError::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
    }

    #[test]
    fn status_codes() {
        assert_eq!(ServerError::AuthenticationFailed("x".into()).status_code(), 401);
        assert_eq!(
            ServerError::VersionConflict {
                server_version: 3,
                client_version: 1
            }
            .status_code(),
            409
        );
        assert_eq!(ServerError::UnknownEndpoint("/x".into()).status_code(), 404);
        assert_eq!(ServerError::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn error_display() {
        let err = ServerError::VersionConflict {
            server_version: 10,
            client_version: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains("5"));
    }
}

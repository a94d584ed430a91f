//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Network collaborators classify failures into these variants at their
/// boundary; the engine branches on the variant, never on message text.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Configuration failed validation.
    #[error("invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// A required collaborator or identifier was not supplied.
    #[error("missing required dependency: {0}")]
    MissingDependency(&'static str),

    /// The server rejected the session credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server has accepted operations the device has not seen yet.
    #[error("server is at version {server_version}, client is behind")]
    VersionConflict {
        /// Server's authoritative version.
        server_version: u64,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server reported a failure without a conflict.
    #[error("server rejected batch: {0}")]
    Rejected(String),

    /// The local operation queue failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The persisted version could not be read or written.
    #[error("version store error: {0}")]
    VersionStore(String),

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid lifecycle transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current status.
        from: String,
        /// Attempted target status.
        to: String,
    },

    /// A timer was requested outside a Tokio runtime.
    #[error("no tokio runtime available to drive the sync timer")]
    NoRuntime,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a later cycle may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Rejected(_) | SyncError::Storage(_) | SyncError::VersionStore(_) => true,
            _ => false,
        }
    }

    /// Returns true if the session itself is unusable.
    pub fn is_authentication(&self) -> bool {
        matches!(self, SyncError::AuthenticationFailed(_))
    }
}

impl From<plotsync_protocol::ProtocolError> for SyncError {
    fn from(err: plotsync_protocol::ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

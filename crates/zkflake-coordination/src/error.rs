use thiserror::Error;

/// Type alias for coordination results.
pub type Result<T> = std::result::Result<T, CoordinationError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("invalid connection settings: {0}")]
    InvalidSettings(String),
    #[error("failed to connect to '{endpoints}': {message}")]
    Connect { endpoints: String, message: String },
    #[error("node already exists: {0}")]
    NodeExists(String),
    #[error("node does not exist: {0}")]
    NoNode(String),
    #[error("node still has children: {0}")]
    NotEmpty(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),
    #[error("coordination session expired")]
    SessionExpired,
    #[error("lock node vanished while waiting: {0}")]
    LockLost(String),
    #[error("coordination operation failed: {0}")]
    Operation(String),
}

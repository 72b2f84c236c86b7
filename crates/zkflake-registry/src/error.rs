use thiserror::Error;
use zkflake_coordination::CoordinationError;

/// Type alias for registry results.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while setting up the registry or allocating a worker id.
///
/// Every allocation error leaves the namespace in a state another attempt
/// can start from; nothing is half-claimed.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("registry is not set up; call setup first")]
    NotConfigured,
    #[error("failed to connect to the coordination service: {0}")]
    Connect(#[source] CoordinationError),
    #[error("{0}")]
    InvalidNamespace(#[source] CoordinationError),
    #[error("failed to ensure path {path}: {source}")]
    PathEnsure {
        path: String,
        #[source]
        source: CoordinationError,
    },
    #[error("failed to acquire lock {path}: {source}")]
    LockAcquire {
        path: String,
        #[source]
        source: CoordinationError,
    },
    #[error("failed to release lock {path}: {source}")]
    LockRelease {
        path: String,
        #[source]
        source: CoordinationError,
    },
    #[error("failed to list workers under {path}: {source}")]
    ChildrenList {
        path: String,
        #[source]
        source: CoordinationError,
    },
    #[error("failed to create worker node {path}: {source}")]
    NodeCreate {
        path: String,
        #[source]
        source: CoordinationError,
    },
    #[error("no worker id left in namespace '{namespace}' ({live} live workers)")]
    WorkerIdSpaceExhausted { namespace: String, live: usize },
    #[error(transparent)]
    Snowflake(#[from] zkflake_snowflake::Error),
}

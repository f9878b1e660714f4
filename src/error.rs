//! Error kinds shared by the registry, the worker pools and the task dispatcher.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Action or queue name is empty or contains characters outside `[A-Za-z0-9_.-]`.
    #[error("invalid {kind} identifier: {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },

    #[error("not found: {0}")]
    NotFound(String),

    /// The resource pool had no free token. Callers branch on this, it is not a crash.
    #[error("resource pool '{0}' is exhausted")]
    ResourceUnavailable(String),

    #[error("sender identity does not match the local node identity")]
    Security,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The queue exists but its worker pool no longer accepts jobs.
    #[error("worker pool for queue '{0}' is closed")]
    PoolClosed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

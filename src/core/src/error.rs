use thiserror::Error;

use crate::state::StateString;

/// vpod error types
#[derive(Error, Debug)]
pub enum PodError {
    /// Configuration error (malformed identifiers, unknown enum values,
    /// malformed volume/socket strings)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Persisted state differs from the state an operation expects
    #[error("Invalid state {current} (expecting {expected})")]
    InvalidState {
        current: StateString,
        expected: StateString,
    },

    /// Requested transition is not in the transition table
    #[error("Can not move from {from} to {to}")]
    InvalidTransition { from: StateString, to: StateString },

    /// A container is not in the state the pod operation requires
    #[error("Container {container} not {expected}")]
    ContainerState {
        container: String,
        expected: StateString,
    },

    /// Pod must be ready before it can be deleted
    #[error("Pod {0} not ready, impossible to delete")]
    NotReady(String),

    /// Pod or container identifier was empty
    #[error("{0} ID cannot be empty")]
    EmptyId(&'static str),

    /// Resource kind does not match the data or the operation
    #[error("Invalid pod resource: {0}")]
    InvalidResource(String),

    /// Fetched payload has an unexpected type
    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    /// Resource store failure with path context
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Pod lock acquisition or release failed
    #[error("Lock error: {0}")]
    LockError(String),

    /// Hypervisor driver failure
    #[error("Hypervisor error: {0}")]
    HypervisorError(String),

    /// Guest agent failure
    #[error("Agent error: {0}")]
    AgentError(String),

    /// Network backend failure
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Primary failure whose compensating cleanup also failed
    #[error("{error} (cleanup failed: {cleanup})")]
    CleanupFailed {
        error: Box<PodError>,
        cleanup: Box<PodError>,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl PodError {
    /// Attach the outcome of a best-effort compensation step.
    ///
    /// A successful cleanup leaves the error untouched; a failed one wraps
    /// both so callers can inspect each.
    pub fn with_cleanup(self, cleanup: Result<()>) -> Self {
        match cleanup {
            Ok(()) => self,
            Err(e) => PodError::CleanupFailed {
                error: Box::new(self),
                cleanup: Box::new(e),
            },
        }
    }

    /// The primary error, looking through any attached cleanup failure.
    pub fn primary(&self) -> &PodError {
        match self {
            PodError::CleanupFailed { error, .. } => error.primary(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for PodError {
    fn from(err: serde_json::Error) -> Self {
        PodError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for PodError {
    fn from(err: serde_yaml::Error) -> Self {
        PodError::SerializationError(err.to_string())
    }
}

/// Result type alias for vpod operations
pub type Result<T> = std::result::Result<T, PodError>;

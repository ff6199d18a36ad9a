//! Error taxonomy shared by every layer of the queue.

use thiserror::Error;

use crate::JobId;

/// Rejection of an operation payload before it is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown operation type: {0}")]
    UnknownOperation(String),

    #[error("malformed payload for {operation}: {message}")]
    MalformedPayload { operation: String, message: String },

    #[error("invalid field `{field}` for {operation}: {message}")]
    InvalidField {
        operation: String,
        field: String,
        message: String,
    },
}

impl ValidationError {
    pub fn field(
        operation: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            operation: operation.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors returned by broker, store and submission calls.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a handler while executing a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Worth retrying, e.g. a collaborator call failed.
    #[error("{0}")]
    Transient(String),

    /// Retrying cannot help; the job fails immediately.
    #[error("{0}")]
    Terminal(String),
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal(message.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HandlerError::Terminal(_))
    }

    pub fn message(&self) -> &str {
        match self {
            HandlerError::Transient(message) | HandlerError::Terminal(message) => message,
        }
    }
}

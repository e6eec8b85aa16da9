use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ThreadworkError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Submission rejected: {0}")]
    RejectedSubmission(String),

    #[error("Task was cancelled")]
    Cancelled,

    #[error("Task failed: {0}")]
    ExecutionFailure(Arc<anyhow::Error>),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl ThreadworkError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::RejectedSubmission(msg.into())
    }

    pub fn failure(cause: anyhow::Error) -> Self {
        Self::ExecutionFailure(Arc::new(cause))
    }

    /// The underlying cause when this is an execution failure.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Self::ExecutionFailure(cause) => Some(cause),
            _ => None,
        }
    }
}

pub type Result<T, E = ThreadworkError> = std::result::Result<T, E>;

//! Job execution errors.

use jobline_queue::JobQueueError;
use thiserror::Error;

/// Errors that may occur during job execution.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing recipient")]
    MissingRecipient,
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

impl From<JobError> for JobQueueError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::InvalidPayload(msg) => JobQueueError::InvalidPayload(msg),
            other => JobQueueError::ExecutionFailed(other.to_string()),
        }
    }
}

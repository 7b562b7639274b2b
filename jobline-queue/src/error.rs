//! Error types for the job queue system.

use jobline_broker::BrokerError;
use thiserror::Error;

use crate::types::JobId;

/// Errors that may occur while interacting with the job queue.
#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("connection unavailable")]
    Unavailable,

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error("handler already registered for job type: {0}")]
    DuplicateHandler(String),

    #[error("no handler registered for job types: {}", .0.join(", "))]
    MissingHandlers(Vec<String>),

    #[error("job name cannot be empty")]
    EmptyJobName,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("job execution failed: {0}")]
    ExecutionFailed(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("corrupt job record {id}: {reason}")]
    Corrupt {
        id: JobId,
        /// Job name, when the record still had one.
        name: Option<String>,
        reason: String,
    },
}

impl From<redis::RedisError> for JobQueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::Broker(BrokerError::from(err))
    }
}

impl From<serde_json::Error> for JobQueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

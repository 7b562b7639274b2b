//! Job handler trait for implementing job handlers.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::JobQueueError;
use crate::types::Job;

/// Trait for implementing job handlers.
///
/// Each job name has exactly one handler. Delivery is at-least-once, so a
/// handler may see the same job id more than once after a crash and must
/// tolerate duplicate execution.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Returns the job name this handler serves.
    fn job_name(&self) -> &str;

    /// Execute the job and return its result value.
    async fn handle(&self, job: &Job) -> Result<Value, JobQueueError>;
}

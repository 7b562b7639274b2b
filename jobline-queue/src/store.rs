//! Broker-side job storage seam.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::JobQueueError;
use crate::types::{Job, JobId, JobRequest};

/// Operations the engine needs from the broker.
///
/// Every method waits for the broker connection to be ready before issuing
/// commands, and reports connectivity failures back to the connection so it
/// can reconnect.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Append a job to `queue`. Calls from one task arrive in call order.
    async fn push(&self, queue: &str, request: &JobRequest) -> Result<JobId, JobQueueError>;

    /// Claim the oldest waiting job for `consumer`, waiting up to `wait` for
    /// one to show up. The claimed job is marked active.
    async fn fetch(&self, queue: &str, consumer: &str, wait: Duration) -> Result<Option<Job>, JobQueueError>;

    /// Acknowledge a claimed job as completed.
    async fn complete(&self, queue: &str, consumer: &str, id: &JobId, result: &Value) -> Result<(), JobQueueError>;

    /// Record a claimed job as failed.
    async fn fail(&self, queue: &str, consumer: &str, id: &JobId, message: &str) -> Result<(), JobQueueError>;

    /// Put jobs `consumer` claimed but never settled back at the head of the
    /// queue. Returns how many were moved.
    async fn requeue_in_flight(&self, queue: &str, consumer: &str) -> Result<usize, JobQueueError>;

    async fn get(&self, queue: &str, id: &JobId) -> Result<Option<Job>, JobQueueError>;
}

//! `send-email` handler.

use std::time::Duration;

use jobline_queue::{async_trait, Job, JobHandler, JobQueueError};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::JobError;
use crate::job_names;

/// Payload for the send-email job.
#[derive(Debug, Deserialize)]
pub struct SendEmailPayload {
    pub to: String,
    #[serde(default)]
    pub body: String,
}

/// Handler for send-email jobs.
///
/// Delivery is simulated: the handler waits for `delay` and reports the
/// message as sent. The payload must name a recipient in `to`: a job
/// without the field fails as an invalid payload, and a blank one fails
/// with a missing recipient error. Nothing is sent in either case.
#[derive(Debug, Clone)]
pub struct SendEmailHandler {
    delay: Duration,
}

impl Default for SendEmailHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SendEmailHandler {
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(1500);

    pub fn new() -> Self {
        Self::with_delay(Self::DEFAULT_DELAY)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl JobHandler for SendEmailHandler {
    fn job_name(&self) -> &str {
        job_names::SEND_EMAIL
    }

    async fn handle(&self, job: &Job) -> Result<Value, JobQueueError> {
        let parsed: SendEmailPayload = serde_json::from_value(job.payload.clone()).map_err(JobError::from)?;
        if parsed.to.trim().is_empty() {
            return Err(JobError::MissingRecipient.into());
        }

        info!(job_id = %job.id, to = %parsed.to, body = %parsed.body, "sending email");
        tokio::time::sleep(self.delay).await;

        Ok(json!({ "status": "sent" }))
    }
}

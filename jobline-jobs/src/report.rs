//! `generate-report` handler.

use std::time::Duration;

use jobline_queue::{async_trait, Job, JobHandler, JobQueueError};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::JobError;
use crate::job_names;

/// Payload for the generate-report job. User ids may be numbers or strings.
#[derive(Debug, Deserialize)]
pub struct GenerateReportPayload {
    #[serde(rename = "userId")]
    pub user_id: Value,
}

/// Handler for generate-report jobs.
///
/// The payload must carry a `userId`; a job without one fails with an
/// invalid payload error instead of producing a report.
#[derive(Debug, Clone)]
pub struct GenerateReportHandler {
    delay: Duration,
}

impl Default for GenerateReportHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerateReportHandler {
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(2000);

    pub fn new() -> Self {
        Self::with_delay(Self::DEFAULT_DELAY)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl JobHandler for GenerateReportHandler {
    fn job_name(&self) -> &str {
        job_names::GENERATE_REPORT
    }

    async fn handle(&self, job: &Job) -> Result<Value, JobQueueError> {
        let parsed: GenerateReportPayload = serde_json::from_value(job.payload.clone()).map_err(JobError::from)?;

        info!(job_id = %job.id, user_id = %parsed.user_id, "generating report");
        tokio::time::sleep(self.delay).await;

        Ok(json!({ "status": "report_ready" }))
    }
}

//! Core types for the job queue system.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Broker-assigned job identifier. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request to enqueue a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,
    pub payload: Value,
}

impl JobRequest {
    #[inline]
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Result returned after a job has been enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResult {
    pub job_id: JobId,
}

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Enqueued,
    Active,
    Completed,
    Failed,
}

impl JobState {
    /// Returns true if this state represents a terminal state.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enqueued" => Ok(Self::Enqueued),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// A unit of work as stored by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub payload: Value,
    pub state: JobState,
    /// Number of times the job has been handed to a worker.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error_message: Option<String>,
}

impl Job {
    /// Create a freshly enqueued job.
    pub fn enqueued(id: JobId, request: JobRequest) -> Self {
        Self {
            id,
            name: request.name,
            payload: request.payload,
            state: JobState::Enqueued,
            attempts: 0,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error_message: None,
        }
    }

    /// Mark the job as handed to a worker.
    #[inline]
    pub fn start(&mut self) {
        self.state = JobState::Active;
        self.attempts += 1;
        self.started_at = Some(Utc::now());
    }

    /// Mark the job as completed with the handler's result.
    #[inline]
    pub fn complete(&mut self, result: Value) {
        self.state = JobState::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    /// Mark the job as failed with an error message.
    #[inline]
    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = JobState::Failed;
        self.finished_at = Some(Utc::now());
        self.error_message = Some(message.into());
    }
}

/// What a single dispatch produced.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success { result: Value },
    Failure { error: String },
}

impl JobOutcome {
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// The structured record emitted once per processed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum JobEvent {
    Completed {
        #[serde(rename = "jobId")]
        job_id: JobId,
        #[serde(rename = "jobName")]
        job_name: String,
        result: Value,
    },
    Failed {
        #[serde(rename = "jobId")]
        job_id: JobId,
        #[serde(rename = "jobName")]
        job_name: String,
        #[serde(rename = "errorMessage")]
        error_message: String,
    },
}

impl JobEvent {
    pub fn from_outcome(job: &Job, outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Success { result } => Self::Completed {
                job_id: job.id.clone(),
                job_name: job.name.clone(),
                result,
            },
            JobOutcome::Failure { error } => Self::Failed {
                job_id: job.id.clone(),
                job_name: job.name.clone(),
                error_message: error,
            },
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Completed { job_id, .. } | Self::Failed { job_id, .. } => job_id,
        }
    }
}

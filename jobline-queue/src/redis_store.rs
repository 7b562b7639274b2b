//! Redis-backed job store.
//!
//! Key layout, everything under `{prefix}:{queue}:`:
//!
//! | key                 | type   | contents                                  |
//! |---------------------|--------|-------------------------------------------|
//! | `id`                | string | id counter (INCR)                         |
//! | `wait`              | list   | waiting ids, LPUSH in, oldest at the right |
//! | `active:{consumer}` | list   | ids claimed by one consumer               |
//! | `job:{id}`          | hash   | job record                                |
//! | `completed`/`failed`| list   | settled ids, newest first, bounded         |
//!
//! Claiming is a single `LMOVE wait active:{consumer} RIGHT LEFT`, so a job is
//! always in exactly one of the lists even if the worker dies mid-flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobline_broker::{BrokerConnection, RedisConnector};
use redis::aio::MultiplexedConnection;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::JobQueueError;
use crate::store::JobStore;
use crate::types::{Job, JobId, JobRequest, JobState};

pub const DEFAULT_KEY_PREFIX: &str = "jobline";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Settled ids kept per outcome list.
const MAX_SETTLED_JOBS: isize = 1000;

#[derive(Debug, Clone)]
struct Keys {
    base: String,
}

impl Keys {
    fn new(prefix: &str, queue: &str) -> Self {
        Self {
            base: format!("{prefix}:{queue}"),
        }
    }

    fn id(&self) -> String {
        format!("{}:id", self.base)
    }

    fn wait(&self) -> String {
        format!("{}:wait", self.base)
    }

    fn active(&self, consumer: &str) -> String {
        format!("{}:active:{consumer}", self.base)
    }

    fn job(&self, id: &JobId) -> String {
        format!("{}:job:{id}", self.base)
    }

    fn settled(&self, state: JobState) -> String {
        format!("{}:{}", self.base, state.as_str())
    }
}

fn encode_job(job: &Job) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("name", job.name.clone()),
        ("data", job.payload.to_string()),
        ("state", job.state.as_str().to_owned()),
        ("attempts", job.attempts.to_string()),
        ("enqueued_at", job.enqueued_at.to_rfc3339()),
    ];
    if let Some(at) = job.started_at {
        fields.push(("started_at", at.to_rfc3339()));
    }
    if let Some(at) = job.finished_at {
        fields.push(("finished_at", at.to_rfc3339()));
    }
    if let Some(result) = &job.result {
        fields.push(("result", result.to_string()));
    }
    if let Some(error) = &job.error_message {
        fields.push(("error", error.clone()));
    }
    fields
}

fn decode_job(id: &JobId, mut fields: HashMap<String, String>) -> Result<Job, JobQueueError> {
    let name_hint = fields.get("name").cloned();
    let corrupt = |reason: String| JobQueueError::Corrupt {
        id: id.clone(),
        name: name_hint.clone(),
        reason,
    };
    let mut take = |field: &str| {
        fields
            .remove(field)
            .ok_or_else(|| corrupt(format!("missing field {field}")))
    };
    let timestamp = |raw: String| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("bad timestamp {raw:?}: {e}")))
    };

    let name = take("name")?;
    let payload = serde_json::from_str(&take("data")?).map_err(|e| corrupt(format!("bad data: {e}")))?;
    let state = take("state")?.parse::<JobState>().map_err(corrupt)?;
    let attempts = take("attempts")?
        .parse::<u32>()
        .map_err(|e| corrupt(format!("bad attempts: {e}")))?;
    let enqueued_at = timestamp(take("enqueued_at")?)?;
    let started_at = take("started_at").ok().map(timestamp).transpose()?;
    let finished_at = take("finished_at").ok().map(timestamp).transpose()?;
    let result = take("result")
        .ok()
        .map(|raw| serde_json::from_str(&raw).map_err(|e| corrupt(format!("bad result: {e}"))))
        .transpose()?;
    let error_message = take("error").ok();

    Ok(Job {
        id: id.clone(),
        name,
        payload,
        state,
        attempts,
        enqueued_at,
        started_at,
        finished_at,
        result,
        error_message,
    })
}

/// [`JobStore`] on a Redis server reached through the shared
/// [`BrokerConnection`].
#[derive(Debug, Clone)]
pub struct RedisStore {
    connection: Arc<BrokerConnection<RedisConnector>>,
    prefix: String,
    poll_interval: Duration,
}

impl RedisStore {
    pub fn new(connection: Arc<BrokerConnection<RedisConnector>>, prefix: impl Into<String>) -> Self {
        Self {
            connection,
            prefix: prefix.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How often an idle fetch re-checks the wait list.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn connection(&self) -> &Arc<BrokerConnection<RedisConnector>> {
        &self.connection
    }

    fn keys(&self, queue: &str) -> Keys {
        Keys::new(&self.prefix, queue)
    }

    /// Runs `op` on the live connection, reporting broker failures so the
    /// connection can be replaced.
    async fn with_conn<T, F, Fut>(&self, op: F) -> Result<T, JobQueueError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, JobQueueError>> + Send,
    {
        let lease = self.connection.acquire().await?;
        let result = op(lease.connection).await;
        if let Err(JobQueueError::Broker(err)) = &result {
            self.connection.report_error(lease.generation, err);
        }
        result
    }

    async fn try_claim(&self, keys: &Keys, consumer: &str) -> Result<Option<Job>, JobQueueError> {
        self.with_conn(|mut conn| async move {
            loop {
                let claimed: Option<String> = redis::cmd("LMOVE")
                    .arg(keys.wait())
                    .arg(keys.active(consumer))
                    .arg("RIGHT")
                    .arg("LEFT")
                    .query_async(&mut conn)
                    .await?;
                let Some(raw) = claimed else {
                    return Ok(None);
                };
                let id = JobId::new(raw);
                let job_key = keys.job(&id);

                let (fields,): (HashMap<String, String>,) = redis::pipe()
                    .atomic()
                    .cmd("HINCRBY")
                    .arg(&job_key)
                    .arg("attempts")
                    .arg(1)
                    .ignore()
                    .cmd("HSET")
                    .arg(&job_key)
                    .arg("state")
                    .arg(JobState::Active.as_str())
                    .arg("started_at")
                    .arg(Utc::now().to_rfc3339())
                    .ignore()
                    .cmd("HGETALL")
                    .arg(&job_key)
                    .query_async(&mut conn)
                    .await?;

                if !fields.contains_key("name") {
                    // Record was trimmed away; the HINCRBY/HSET above just
                    // recreated a stub. Drop both and keep claiming.
                    warn!(job_id = %id, "claimed id has no job record, discarding");
                    redis::pipe()
                        .cmd("DEL")
                        .arg(&job_key)
                        .ignore()
                        .cmd("LREM")
                        .arg(keys.active(consumer))
                        .arg(1)
                        .arg(id.as_str())
                        .ignore()
                        .query_async::<()>(&mut conn)
                        .await?;
                    continue;
                }
                return decode_job(&id, fields).map(Some);
            }
        })
        .await
    }

    async fn settle(
        &self,
        queue: &str,
        consumer: &str,
        id: &JobId,
        state: JobState,
        fields: Vec<(&'static str, String)>,
    ) -> Result<(), JobQueueError> {
        let keys = self.keys(queue);
        self.with_conn(|mut conn| async move {
            let removed: i64 = redis::cmd("LREM")
                .arg(keys.active(consumer))
                .arg(1)
                .arg(id.as_str())
                .query_async(&mut conn)
                .await?;
            if removed == 0 {
                return Err(JobQueueError::NotFound(id.clone()));
            }

            let settled = keys.settled(state);
            let mut hset = redis::cmd("HSET");
            hset.arg(keys.job(id))
                .arg("state")
                .arg(state.as_str())
                .arg("finished_at")
                .arg(Utc::now().to_rfc3339());
            for (field, value) in fields {
                hset.arg(field).arg(value);
            }
            let (expired,): (Vec<String>,) = redis::pipe()
                .atomic()
                .add_command(hset)
                .ignore()
                .cmd("LPUSH")
                .arg(&settled)
                .arg(id.as_str())
                .ignore()
                .cmd("LRANGE")
                .arg(&settled)
                .arg(MAX_SETTLED_JOBS)
                .arg(-1)
                .query_async(&mut conn)
                .await?;

            if !expired.is_empty() {
                let mut trim = redis::pipe();
                for old in &expired {
                    trim.cmd("DEL").arg(keys.job(&JobId::new(old.as_str()))).ignore();
                }
                trim.cmd("LTRIM")
                    .arg(&settled)
                    .arg(0)
                    .arg(MAX_SETTLED_JOBS - 1)
                    .ignore()
                    .query_async::<()>(&mut conn)
                    .await?;
                debug!(list = %settled, dropped = expired.len(), "trimmed settled jobs");
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn push(&self, queue: &str, request: &JobRequest) -> Result<JobId, JobQueueError> {
        let keys = self.keys(queue);
        self.with_conn(|mut conn| async move {
            let next: u64 = redis::cmd("INCR").arg(keys.id()).query_async(&mut conn).await?;
            let id = JobId::new(next.to_string());
            let job = Job::enqueued(id.clone(), request.clone());

            let mut hset = redis::cmd("HSET");
            hset.arg(keys.job(&id));
            for (field, value) in encode_job(&job) {
                hset.arg(field).arg(value);
            }
            redis::pipe()
                .atomic()
                .add_command(hset)
                .ignore()
                .cmd("LPUSH")
                .arg(keys.wait())
                .arg(id.as_str())
                .ignore()
                .query_async::<()>(&mut conn)
                .await?;
            Ok::<_, JobQueueError>(id)
        })
        .await
    }

    async fn fetch(&self, queue: &str, consumer: &str, wait: Duration) -> Result<Option<Job>, JobQueueError> {
        let keys = self.keys(queue);
        let deadline = Instant::now() + wait;
        loop {
            if let Some(job) = self.try_claim(&keys, consumer).await? {
                return Ok(Some(job));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn complete(&self, queue: &str, consumer: &str, id: &JobId, result: &Value) -> Result<(), JobQueueError> {
        self.settle(queue, consumer, id, JobState::Completed, vec![("result", result.to_string())])
            .await
    }

    async fn fail(&self, queue: &str, consumer: &str, id: &JobId, message: &str) -> Result<(), JobQueueError> {
        self.settle(queue, consumer, id, JobState::Failed, vec![("error", message.to_owned())])
            .await
    }

    async fn requeue_in_flight(&self, queue: &str, consumer: &str) -> Result<usize, JobQueueError> {
        let keys = self.keys(queue);
        self.with_conn(|mut conn| async move {
            let mut moved = 0usize;
            // Newest claim first, each to the head, so the oldest ends up next.
            loop {
                let id: Option<String> = redis::cmd("LMOVE")
                    .arg(keys.active(consumer))
                    .arg(keys.wait())
                    .arg("LEFT")
                    .arg("RIGHT")
                    .query_async(&mut conn)
                    .await?;
                let Some(id) = id else { break };
                redis::cmd("HSET")
                    .arg(keys.job(&JobId::new(id.as_str())))
                    .arg("state")
                    .arg(JobState::Enqueued.as_str())
                    .query_async::<()>(&mut conn)
                    .await?;
                moved += 1;
            }
            Ok::<_, JobQueueError>(moved)
        })
        .await
    }

    async fn get(&self, queue: &str, id: &JobId) -> Result<Option<Job>, JobQueueError> {
        let keys = self.keys(queue);
        self.with_conn(|mut conn| async move {
            let fields: HashMap<String, String> = redis::cmd("HGETALL")
                .arg(keys.job(id))
                .query_async(&mut conn)
                .await?;
            if fields.is_empty() {
                return Ok(None);
            }
            decode_job(id, fields).map(Some)
        })
        .await
    }
}

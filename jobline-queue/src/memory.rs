//! In-process job store.
//!
//! Keeps the same bookkeeping as the Redis store (waiting list, per-consumer
//! in-flight list, bounded history of settled jobs) and routes every
//! operation through a [`BrokerConnection`] so that an offline broker looks
//! the same to the engine as a real outage.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jobline_broker::{BrokerConnection, ConnectOptions, MemoryConnector};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::JobQueueError;
use crate::store::JobStore;
use crate::types::{Job, JobId, JobRequest, JobState};

/// Maximum number of settled jobs to keep per queue.
const MAX_SETTLED_JOBS: usize = 1000;

/// Per-queue storage optimized for both FIFO claiming and lookup by ID.
#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    waiting: VecDeque<JobId>,
    in_flight: HashMap<String, Vec<JobId>>,
    /// Settled job IDs, oldest first.
    settled: VecDeque<JobId>,
    jobs: HashMap<JobId, Job>,
}

impl QueueState {
    fn push(&mut self, request: JobRequest) -> JobId {
        self.next_id += 1;
        let id = JobId::new(self.next_id.to_string());
        self.jobs.insert(id.clone(), Job::enqueued(id.clone(), request));
        self.waiting.push_back(id.clone());
        id
    }

    fn claim(&mut self, consumer: &str) -> Option<Job> {
        while let Some(id) = self.waiting.pop_front() {
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            job.start();
            let claimed = job.clone();
            self.in_flight.entry(consumer.to_owned()).or_default().push(id);
            return Some(claimed);
        }
        None
    }

    fn settle(&mut self, consumer: &str, id: &JobId, apply: impl FnOnce(&mut Job)) -> Result<(), JobQueueError> {
        let owned = self
            .in_flight
            .get_mut(consumer)
            .and_then(|ids| ids.iter().position(|x| x == id).map(|pos| ids.remove(pos)));
        if owned.is_none() {
            return Err(JobQueueError::NotFound(id.clone()));
        }
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobQueueError::NotFound(id.clone()))?;
        apply(job);

        self.settled.push_back(id.clone());
        while self.settled.len() > MAX_SETTLED_JOBS {
            if let Some(old) = self.settled.pop_front() {
                self.jobs.remove(&old);
            }
        }
        Ok(())
    }

    fn requeue(&mut self, consumer: &str) -> usize {
        let ids = self.in_flight.remove(consumer).unwrap_or_default();
        let count = ids.len();
        for id in ids.into_iter().rev() {
            if let Some(job) = self.jobs.get_mut(&id) {
                job.state = JobState::Enqueued;
            }
            self.waiting.push_front(id);
        }
        count
    }
}

/// Snapshot of one queue's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub settled: usize,
}

/// [`JobStore`] kept in process memory.
pub struct MemoryStore {
    connection: Arc<BrokerConnection<MemoryConnector>>,
    queues: Mutex<HashMap<String, QueueState>>,
    arrivals: Notify,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("connection", &self.connection)
            .field("queues", &"<Mutex<HashMap<String, QueueState>>>")
            .finish()
    }
}

impl MemoryStore {
    pub fn new(connection: Arc<BrokerConnection<MemoryConnector>>) -> Self {
        Self {
            connection,
            queues: Mutex::new(HashMap::new()),
            arrivals: Notify::new(),
        }
    }

    /// Store with its own always-online in-memory broker connection.
    pub fn standalone() -> Self {
        Self::new(BrokerConnection::connect(
            MemoryConnector::new(),
            ConnectOptions::default(),
        ))
    }

    pub fn connection(&self) -> &Arc<BrokerConnection<MemoryConnector>> {
        &self.connection
    }

    pub fn counts(&self, queue: &str) -> QueueCounts {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues
            .get(queue)
            .map(|q| QueueCounts {
                waiting: q.waiting.len(),
                active: q.in_flight.values().map(Vec::len).sum(),
                settled: q.settled.len(),
            })
            .unwrap_or_default()
    }

    /// Checks the link the way a real command would, reporting breakage.
    async fn link(&self, writes: bool) -> Result<(), JobQueueError> {
        let lease = self.connection.acquire().await?;
        if let Err(err) = lease.connection.check(writes) {
            self.connection.report_error(lease.generation, &err);
            return Err(err.into());
        }
        Ok(())
    }

    fn with_queue<T>(&self, queue: &str, f: impl FnOnce(&mut QueueState) -> T) -> T {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        f(queues.entry(queue.to_owned()).or_default())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn push(&self, queue: &str, request: &JobRequest) -> Result<JobId, JobQueueError> {
        self.link(true).await?;
        let id = self.with_queue(queue, |q| q.push(request.clone()));
        self.arrivals.notify_waiters();
        Ok(id)
    }

    async fn fetch(&self, queue: &str, consumer: &str, wait: Duration) -> Result<Option<Job>, JobQueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let arrived = self.arrivals.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            self.link(true).await?;
            if let Some(job) = self.with_queue(queue, |q| q.claim(consumer)) {
                return Ok(Some(job));
            }

            tokio::select! {
                _ = &mut arrived => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn complete(&self, queue: &str, consumer: &str, id: &JobId, result: &Value) -> Result<(), JobQueueError> {
        self.link(true).await?;
        self.with_queue(queue, |q| q.settle(consumer, id, |job| job.complete(result.clone())))
    }

    async fn fail(&self, queue: &str, consumer: &str, id: &JobId, message: &str) -> Result<(), JobQueueError> {
        self.link(true).await?;
        self.with_queue(queue, |q| q.settle(consumer, id, |job| job.fail(message)))
    }

    async fn requeue_in_flight(&self, queue: &str, consumer: &str) -> Result<usize, JobQueueError> {
        self.link(true).await?;
        let moved = self.with_queue(queue, |q| q.requeue(consumer));
        if moved > 0 {
            self.arrivals.notify_waiters();
        }
        Ok(moved)
    }

    async fn get(&self, queue: &str, id: &JobId) -> Result<Option<Job>, JobQueueError> {
        self.link(false).await?;
        Ok(self.with_queue(queue, |q| q.jobs.get(id).cloned()))
    }
}

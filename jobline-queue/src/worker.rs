//! The consumer loop.
//!
//! One [`Worker`] per process pulls jobs from a single queue, one at a time.
//! Each job runs on its own task so that a panicking or hung handler cannot
//! take the loop down with it. Every fetched job yields exactly one
//! [`JobEvent`], delivered after the broker has been told the outcome.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobline_broker::BrokerError;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::JobQueueError;
use crate::handler::JobHandler;
use crate::observer::JobObserver;
use crate::registry::HandlerRegistry;
use crate::store::JobStore;
use crate::types::{Job, JobEvent, JobId, JobOutcome};

pub const DEFAULT_QUEUE_NAME: &str = "tasks";
pub const DEFAULT_FETCH_WAIT: Duration = Duration::from_secs(1);

const ACK_ATTEMPTS: u32 = 3;
const FETCH_ERROR_PAUSE: Duration = Duration::from_millis(250);
/// Upper bound on handing interrupted claims back while stopping.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Uninitialized,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        })
    }
}

/// Consumer name used when none is configured.
///
/// Derived from the host name, so it survives restarts on the same machine
/// and a restarted worker reclaims the jobs it left in flight.
pub fn default_consumer_name() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|raw| raw.trim().to_owned())
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| "local".to_owned());
    format!("worker-{host}")
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub queue: String,
    /// Identifies this worker's in-flight list at the broker. Reusing the
    /// name across restarts lets a restarted worker reclaim its orphans.
    pub consumer: String,
    /// Longest a single fetch waits before checking for shutdown again.
    pub fetch_wait: Duration,
    /// Per-job execution limit. `None` lets handlers run indefinitely.
    pub job_timeout: Option<Duration>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE_NAME.to_owned(),
            consumer: default_consumer_name(),
            fetch_wait: DEFAULT_FETCH_WAIT,
            job_timeout: None,
        }
    }
}

pub struct Worker {
    options: WorkerOptions,
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    observer: Arc<dyn JobObserver>,
    state: watch::Sender<WorkerState>,
    shutdown: CancellationToken,
    processed: AtomicU64,
    handler_task: Mutex<Option<AbortHandle>>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("options", &self.options)
            .field("state", &*self.state.borrow())
            .field("processed", &self.processed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Worker {
    pub fn new(
        options: WorkerOptions,
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        observer: Arc<dyn JobObserver>,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Uninitialized);
        Self {
            options,
            store,
            registry,
            observer,
            state,
            shutdown: CancellationToken::new(),
            processed: AtomicU64::new(0),
            handler_task: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Jobs that went through dispatch, successful or not.
    pub fn jobs_processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    /// Stop fetching. A job already in flight runs to completion first.
    pub fn drain(&self) {
        self.shutdown.cancel();
        self.transition(WorkerState::Running, WorkerState::Draining);
    }

    /// Kills the running handler task, if any. Used when a stop is forced:
    /// aborting [`run`](Self::run) alone leaves the handler task detached.
    pub fn abort_in_flight(&self) {
        let handle = self.handler_task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            warn!(queue = %self.options.queue, "aborting in-flight handler");
            handle.abort();
        }
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(queue = %self.options.queue, %from, %to, "worker state changed");
        }
        changed
    }

    /// Runs the consume loop until [`drain`](Self::drain) is called or the
    /// broker connection is closed for good.
    pub async fn run(&self) {
        if !self.transition(WorkerState::Uninitialized, WorkerState::Running) {
            warn!(state = %self.state(), "worker already started, ignoring");
            return;
        }
        info!(
            queue = %self.options.queue,
            consumer = %self.options.consumer,
            handlers = ?self.registry.job_names(),
            "worker running"
        );

        self.reclaim_orphans().await;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            let fetched = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => None,
                fetched = self.store.fetch(&self.options.queue, &self.options.consumer, self.options.fetch_wait) => Some(fetched),
            };
            let Some(fetched) = fetched else {
                self.release_interrupted_claims().await;
                break;
            };

            match fetched {
                Ok(Some(job)) => {
                    self.process(job).await;
                }
                Ok(None) => {}
                Err(JobQueueError::Corrupt { id, name, reason }) => {
                    self.reject_corrupt(id, name, reason).await;
                }
                Err(JobQueueError::Broker(err)) if is_terminal(&err) => {
                    error!(error = %err, "broker connection closed, worker stopping");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "fetch failed");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(FETCH_ERROR_PAUSE) => {}
                    }
                }
            }
        }

        self.transition(WorkerState::Running, WorkerState::Draining);
        self.state.send_replace(WorkerState::Stopped);
        info!(queue = %self.options.queue, processed = self.jobs_processed(), "worker stopped");
    }

    async fn reclaim_orphans(&self) {
        match self
            .store
            .requeue_in_flight(&self.options.queue, &self.options.consumer)
            .await
        {
            Ok(0) => {}
            Ok(moved) => info!(moved, consumer = %self.options.consumer, "requeued jobs left in flight"),
            Err(err) => warn!(error = %err, "could not requeue in-flight jobs"),
        }
    }

    /// The fetch dropped on drain may already have claimed a job at the
    /// broker. Nothing else is in flight at that point, so everything left in
    /// our in-flight list goes back to the queue.
    async fn release_interrupted_claims(&self) {
        let requeue = self
            .store
            .requeue_in_flight(&self.options.queue, &self.options.consumer);
        match tokio::time::timeout(RELEASE_TIMEOUT, requeue).await {
            Ok(Ok(0)) => {}
            Ok(Ok(moved)) => info!(moved, consumer = %self.options.consumer, "returned interrupted claims to the queue"),
            Ok(Err(err)) => warn!(error = %err, "could not return interrupted claims, the next start requeues them"),
            Err(_) => warn!("timed out returning interrupted claims, the next start requeues them"),
        }
    }

    /// A claimed record that cannot be decoded is failed like any other job,
    /// so it is neither retried forever nor dropped without an event.
    async fn reject_corrupt(&self, id: JobId, name: Option<String>, reason: String) -> JobEvent {
        let error = format!("corrupt job record: {reason}");
        warn!(job_id = %id, error = %error, "rejecting unreadable job");

        let outcome = JobOutcome::Failure { error: error.clone() };
        self.acknowledge(&id, &outcome).await;
        self.emit(JobEvent::Failed {
            job_id: id,
            job_name: name.unwrap_or_default(),
            error_message: error,
        })
    }

    fn emit(&self, event: JobEvent) -> JobEvent {
        self.processed.fetch_add(1, Ordering::AcqRel);
        self.observer.on_event(&event);
        event
    }

    /// Dispatch one claimed job, acknowledge it, then emit its event.
    pub async fn process(&self, job: Job) -> JobEvent {
        debug!(job_id = %job.id, job_name = %job.name, attempt = job.attempts, "processing job");

        let outcome = match self.registry.resolve(&job.name) {
            Ok(handler) => self.invoke(handler, &job).await,
            Err(err) => JobOutcome::Failure {
                error: err.to_string(),
            },
        };

        self.acknowledge(&job.id, &outcome).await;
        self.emit(JobEvent::from_outcome(&job, outcome))
    }

    async fn invoke(&self, handler: Arc<dyn JobHandler>, job: &Job) -> JobOutcome {
        let task_job = job.clone();
        let task = tokio::spawn(async move { handler.handle(&task_job).await });
        let abort = task.abort_handle();
        *self.handler_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(abort.clone());
        let outcome = self.join_handler(task, abort).await;
        self.handler_task.lock().unwrap_or_else(|e| e.into_inner()).take();
        outcome
    }

    async fn join_handler(
        &self,
        task: tokio::task::JoinHandle<Result<Value, JobQueueError>>,
        abort: AbortHandle,
    ) -> JobOutcome {
        let joined = match self.options.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return JobOutcome::Failure {
                        error: format!("job timed out after {}ms", limit.as_millis()),
                    };
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(result)) => JobOutcome::Success { result },
            Ok(Err(err)) => JobOutcome::Failure {
                error: err.to_string(),
            },
            Err(err) => JobOutcome::Failure {
                error: join_failure(err),
            },
        }
    }

    async fn acknowledge(&self, id: &JobId, outcome: &JobOutcome) {
        let queue = &self.options.queue;
        let consumer = &self.options.consumer;
        for attempt in 1..=ACK_ATTEMPTS {
            let acked = match outcome {
                JobOutcome::Success { result } => self.store.complete(queue, consumer, id, result).await,
                JobOutcome::Failure { error } => self.store.fail(queue, consumer, id, error).await,
            };
            match acked {
                Ok(()) => return,
                Err(JobQueueError::Broker(err)) if err.requires_reconnect() && attempt < ACK_ATTEMPTS => {
                    debug!(job_id = %id, attempt, error = %err, "retrying acknowledgement");
                }
                Err(err) => {
                    // Still in our in-flight list; the next start requeues it.
                    error!(job_id = %id, error = %err, "could not acknowledge job");
                    return;
                }
            }
        }
    }
}

fn is_terminal(err: &BrokerError) -> bool {
    matches!(err, BrokerError::Closed | BrokerError::RetriesExhausted { .. })
}

fn join_failure(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let panic = err.into_panic();
    format!("handler panicked: {}", panic_message(panic.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::observer::ChannelObserver;
    use crate::types::{JobId, JobRequest, JobState};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    struct Sleepy {
        name: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl JobHandler for Sleepy {
        fn job_name(&self) -> &str {
            self.name
        }

        async fn handle(&self, job: &Job) -> Result<Value, JobQueueError> {
            tokio::time::sleep(self.delay).await;
            Ok(json!({"echo": job.payload}))
        }
    }

    struct Broken;

    #[async_trait]
    impl JobHandler for Broken {
        fn job_name(&self) -> &str {
            "broken"
        }

        async fn handle(&self, job: &Job) -> Result<Value, JobQueueError> {
            if job.payload.get("panic").is_some() {
                panic!("handler exploded");
            }
            Err(JobQueueError::ExecutionFailed("smtp refused".into()))
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        worker: Arc<Worker>,
        events: mpsc::UnboundedReceiver<JobEvent>,
    }

    fn harness(job_timeout: Option<Duration>) -> Harness {
        let store = Arc::new(MemoryStore::standalone());
        let mut builder = HandlerRegistry::builder();
        builder
            .register(Sleepy {
                name: "slow",
                delay: Duration::from_millis(500),
            })
            .unwrap()
            .register(Broken)
            .unwrap();
        let (observer, events) = ChannelObserver::new();
        let options = WorkerOptions {
            consumer: "test-worker".into(),
            fetch_wait: Duration::from_millis(100),
            job_timeout,
            ..WorkerOptions::default()
        };
        let worker = Arc::new(Worker::new(
            options,
            store.clone(),
            Arc::new(builder.build()),
            Arc::new(observer),
        ));
        Harness { store, worker, events }
    }

    enum Tamper {
        /// Claim, then hang before handing the job over.
        SlowReply(Duration),
        /// Claim, then report the record as unreadable.
        Garble,
    }

    /// Wraps a [`MemoryStore`] to misbehave on `fetch` after the claim.
    struct Tampered {
        inner: Arc<MemoryStore>,
        tamper: Tamper,
    }

    #[async_trait]
    impl JobStore for Tampered {
        async fn push(&self, queue: &str, request: &JobRequest) -> Result<JobId, JobQueueError> {
            self.inner.push(queue, request).await
        }

        async fn fetch(&self, queue: &str, consumer: &str, wait: Duration) -> Result<Option<Job>, JobQueueError> {
            let Some(job) = self.inner.fetch(queue, consumer, wait).await? else {
                return Ok(None);
            };
            match self.tamper {
                Tamper::SlowReply(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(Some(job))
                }
                Tamper::Garble => Err(JobQueueError::Corrupt {
                    id: job.id,
                    name: Some(job.name),
                    reason: "bad data: expected value at line 1 column 1".into(),
                }),
            }
        }

        async fn complete(&self, queue: &str, consumer: &str, id: &JobId, result: &Value) -> Result<(), JobQueueError> {
            self.inner.complete(queue, consumer, id, result).await
        }

        async fn fail(&self, queue: &str, consumer: &str, id: &JobId, message: &str) -> Result<(), JobQueueError> {
            self.inner.fail(queue, consumer, id, message).await
        }

        async fn requeue_in_flight(&self, queue: &str, consumer: &str) -> Result<usize, JobQueueError> {
            self.inner.requeue_in_flight(queue, consumer).await
        }

        async fn get(&self, queue: &str, id: &JobId) -> Result<Option<Job>, JobQueueError> {
            self.inner.get(queue, id).await
        }
    }

    fn tampered_worker(store: Arc<MemoryStore>, tamper: Tamper) -> (Arc<Worker>, mpsc::UnboundedReceiver<JobEvent>) {
        let mut builder = HandlerRegistry::builder();
        builder
            .register(Sleepy {
                name: "slow",
                delay: Duration::from_millis(500),
            })
            .unwrap();
        let (observer, events) = ChannelObserver::new();
        let options = WorkerOptions {
            consumer: "test-worker".into(),
            fetch_wait: Duration::from_millis(100),
            ..WorkerOptions::default()
        };
        let worker = Worker::new(
            options,
            Arc::new(Tampered { inner: store, tamper }),
            Arc::new(builder.build()),
            Arc::new(observer),
        );
        (Arc::new(worker), events)
    }

    async fn push(store: &MemoryStore, name: &str, payload: Value) -> JobId {
        store
            .push(DEFAULT_QUEUE_NAME, &JobRequest::new(name, payload))
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_jobs_fail_and_the_loop_continues() {
        let mut h = harness(None);
        let unknown = push(&h.store, "unknown-job", json!({})).await;
        let valid = push(&h.store, "slow", json!(1)).await;

        let worker = h.worker.clone();
        let running = tokio::spawn(async move { worker.run().await });

        match h.events.recv().await.unwrap() {
            JobEvent::Failed { job_id, error_message, .. } => {
                assert_eq!(job_id, unknown);
                assert!(error_message.contains("unknown job type"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        match h.events.recv().await.unwrap() {
            JobEvent::Completed { job_id, result, .. } => {
                assert_eq!(job_id, valid);
                assert_eq!(result, json!({"echo": 1}));
            }
            other => panic!("expected completion, got {other:?}"),
        }

        // Acknowledged before the event went out.
        let stored = h.store.get(DEFAULT_QUEUE_NAME, &valid).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);

        h.worker.drain();
        running.await.unwrap();
        assert_eq!(h.worker.state(), WorkerState::Stopped);
        assert_eq!(h.worker.jobs_processed(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn handler_errors_and_panics_become_failures() {
        let h = harness(None);
        let errored = Job::enqueued(JobId::new("a"), JobRequest::new("broken", json!({})));
        let panicked = Job::enqueued(JobId::new("b"), JobRequest::new("broken", json!({"panic": true})));

        match h.worker.process(errored).await {
            JobEvent::Failed { error_message, .. } => assert!(error_message.contains("smtp refused")),
            other => panic!("unexpected {other:?}"),
        }
        match h.worker.process(panicked).await {
            JobEvent::Failed { error_message, .. } => {
                assert_eq!(error_message, "handler panicked: handler exploded")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.worker.jobs_processed(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn job_timeout_fails_the_job() {
        let h = harness(Some(Duration::from_millis(100)));
        let job = Job::enqueued(JobId::new("t"), JobRequest::new("slow", json!(null)));
        match h.worker.process(job).await {
            JobEvent::Failed { error_message, .. } => assert_eq!(error_message, "job timed out after 100ms"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drain_lets_the_in_flight_job_finish() {
        let mut h = harness(None);
        let first = push(&h.store, "slow", json!("a")).await;
        push(&h.store, "slow", json!("b")).await;

        let worker = h.worker.clone();
        let running = tokio::spawn(async move { worker.run().await });

        // Mid-way through the first job.
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.worker.drain();
        assert_eq!(h.worker.state(), WorkerState::Draining);

        running.await.unwrap();
        assert_eq!(h.worker.state(), WorkerState::Stopped);
        assert_eq!(h.events.recv().await.unwrap().job_id(), &first);
        assert!(h.events.try_recv().is_err());

        // The second job was never fetched.
        assert_eq!(h.store.counts(DEFAULT_QUEUE_NAME).waiting, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn orphans_from_a_previous_run_are_processed_first() {
        let mut h = harness(None);
        let orphan = push(&h.store, "slow", json!("orphan")).await;
        push(&h.store, "slow", json!("next")).await;
        // Simulate a crash: claimed under our consumer name, never settled.
        h.store
            .fetch(DEFAULT_QUEUE_NAME, "test-worker", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();

        let worker = h.worker.clone();
        let running = tokio::spawn(async move { worker.run().await });

        assert_eq!(h.events.recv().await.unwrap().job_id(), &orphan);
        let redelivered = h.store.get(DEFAULT_QUEUE_NAME, &orphan).await.unwrap().unwrap();
        assert_eq!(redelivered.attempts, 2);

        h.worker.drain();
        running.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_is_a_no_op() {
        let h = harness(None);
        let worker = h.worker.clone();
        let running = tokio::spawn(async move { worker.run().await });
        tokio::task::yield_now().await;

        h.worker.drain();
        running.await.unwrap();
        h.worker.run().await;
        assert_eq!(h.worker.state(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_during_a_claiming_fetch_returns_the_job_to_the_queue() {
        let store = Arc::new(MemoryStore::standalone());
        let id = push(&store, "slow", json!("held")).await;
        let (worker, mut events) = tampered_worker(store.clone(), Tamper::SlowReply(Duration::from_secs(60)));

        let running = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        // Claimed at the broker, reply still outstanding.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.counts(DEFAULT_QUEUE_NAME).active, 1);

        worker.drain();
        running.await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);

        let counts = store.counts(DEFAULT_QUEUE_NAME);
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.active, 0);
        assert_eq!(store.get(DEFAULT_QUEUE_NAME, &id).await.unwrap().unwrap().state, JobState::Enqueued);
        assert!(events.try_recv().is_err());
        assert_eq!(worker.jobs_processed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_records_are_failed_with_an_event() {
        let store = Arc::new(MemoryStore::standalone());
        let id = push(&store, "garbled", json!({})).await;
        let (worker, mut events) = tampered_worker(store.clone(), Tamper::Garble);

        let running = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        match events.recv().await.unwrap() {
            JobEvent::Failed {
                job_id,
                job_name,
                error_message,
            } => {
                assert_eq!(job_id, id);
                assert_eq!(job_name, "garbled");
                assert!(error_message.starts_with("corrupt job record: bad data"), "{error_message}");
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let stored = store.get(DEFAULT_QUEUE_NAME, &id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(store.counts(DEFAULT_QUEUE_NAME).active, 0);

        worker.drain();
        running.await.unwrap();
        assert_eq!(worker.jobs_processed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn aborting_in_flight_kills_the_handler_task() {
        let h = harness(None);
        let job = Job::enqueued(JobId::new("long"), JobRequest::new("slow", json!(null)));

        let worker = h.worker.clone();
        let processing = tokio::spawn(async move { worker.process(job).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        h.worker.abort_in_flight();
        match processing.await.unwrap() {
            JobEvent::Failed { error_message, .. } => assert!(error_message.contains("cancelled"), "{error_message}"),
            other => panic!("expected failure, got {other:?}"),
        }
        // Nothing left to abort.
        h.worker.abort_in_flight();
    }

    #[test]
    fn default_consumer_name_is_stable() {
        let name = default_consumer_name();
        assert!(name.len() > "worker-".len(), "{name}");
        assert!(name.starts_with("worker-"));
        assert!(!name.contains(char::is_whitespace));
        assert_eq!(name, default_consumer_name());
        assert_eq!(WorkerOptions::default().consumer, name);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_with_default_options_recovers_claims() {
        let store = Arc::new(MemoryStore::standalone());
        let orphan = push(&store, "slow", json!("orphan")).await;
        // A previous process on default options claimed it, then died.
        store
            .fetch(DEFAULT_QUEUE_NAME, &WorkerOptions::default().consumer, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.counts(DEFAULT_QUEUE_NAME).active, 1);

        let mut builder = HandlerRegistry::builder();
        builder
            .register(Sleepy {
                name: "slow",
                delay: Duration::from_millis(10),
            })
            .unwrap();
        let (observer, mut events) = ChannelObserver::new();
        let worker = Arc::new(Worker::new(
            WorkerOptions {
                fetch_wait: Duration::from_millis(100),
                ..WorkerOptions::default()
            },
            store.clone(),
            Arc::new(builder.build()),
            Arc::new(observer),
        ));
        let running = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        assert_eq!(events.recv().await.unwrap().job_id(), &orphan);
        assert_eq!(store.get(DEFAULT_QUEUE_NAME, &orphan).await.unwrap().unwrap().state, JobState::Completed);

        worker.drain();
        running.await.unwrap();
    }
}

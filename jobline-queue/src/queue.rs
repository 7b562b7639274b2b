//! Producer side: submitting jobs to a named queue.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::JobQueueError;
use crate::store::JobStore;
use crate::types::{EnqueueResult, JobRequest};

/// Handle for enqueuing jobs onto one queue.
///
/// While the broker is not ready, `enqueue` waits for it, including when the
/// connection drops in the middle of a push. With a
/// [`ready_timeout`](Queue::with_ready_timeout) set, the call instead fails
/// with [`JobQueueError::Unavailable`] once that much time has passed.
///
/// Clones share a submission lock, so jobs enqueued through one `Queue` (and
/// its clones) reach the broker in call order.
#[derive(Clone)]
pub struct Queue {
    name: Arc<str>,
    store: Arc<dyn JobStore>,
    submit: Arc<Mutex<()>>,
    ready_timeout: Option<Duration>,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("ready_timeout", &self.ready_timeout)
            .finish()
    }
}

impl Queue {
    pub fn new(name: impl Into<Arc<str>>, store: Arc<dyn JobStore>) -> Self {
        Self {
            name: name.into(),
            store,
            submit: Arc::new(Mutex::new(())),
            ready_timeout: None,
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a job by name.
    pub async fn enqueue(&self, name: &str, payload: Value) -> Result<EnqueueResult, JobQueueError> {
        self.add(JobRequest::new(name, payload)).await
    }

    pub async fn add(&self, request: JobRequest) -> Result<EnqueueResult, JobQueueError> {
        if request.name.trim().is_empty() {
            return Err(JobQueueError::EmptyJobName);
        }

        let submit = async {
            let _order = self.submit.lock().await;
            loop {
                match self.store.push(&self.name, &request).await {
                    // The store already handed the broken connection back;
                    // the next push waits for its replacement.
                    Err(JobQueueError::Broker(err)) if err.requires_reconnect() => {
                        debug!(queue = %self.name, error = %err, "broker unavailable, retrying enqueue");
                    }
                    pushed => break pushed,
                }
            }
        };
        let job_id = match self.ready_timeout {
            Some(limit) => tokio::time::timeout(limit, submit)
                .await
                .map_err(|_| JobQueueError::Unavailable)??,
            None => submit.await?,
        };

        debug!(queue = %self.name, job_id = %job_id, job_name = %request.name, "job enqueued");
        Ok(EnqueueResult { job_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::types::JobState;
    use jobline_broker::{BrokerConnection, ConnectOptions, MemoryConnector};
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn preserves_submission_order() {
        let store = Arc::new(MemoryStore::standalone());
        let queue = Queue::new("tasks", store.clone());

        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(queue.enqueue("send-email", json!({"n": n})).await.unwrap().job_id);
        }

        for (n, expected) in ids.iter().enumerate() {
            let job = store.fetch("tasks", "w", Duration::ZERO).await.unwrap().unwrap();
            assert_eq!(&job.id, expected);
            assert_eq!(job.payload, json!({"n": n}));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_blank_names() {
        let queue = Queue::new("tasks", Arc::new(MemoryStore::standalone()));
        assert!(matches!(
            queue.enqueue("  ", json!({})).await,
            Err(JobQueueError::EmptyJobName)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_until_the_broker_is_back() {
        let connector = MemoryConnector::new();
        connector.set_online(false);
        let store = Arc::new(MemoryStore::new(BrokerConnection::connect(
            connector.clone(),
            ConnectOptions::default(),
        )));
        let queue = Queue::new("tasks", store.clone());

        let pending = tokio::spawn({
            let queue = queue.clone();
            async move { queue.enqueue("generate-report", json!({"userId": 1})).await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!pending.is_finished());

        connector.set_online(true);
        let job_id = pending.await.unwrap().unwrap().job_id;
        let job = store.get("tasks", &job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Enqueued);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_out_an_outage_on_a_live_connection() {
        let connector = MemoryConnector::new();
        let connection = BrokerConnection::connect(connector.clone(), ConnectOptions::default());
        connection.acquire().await.unwrap();
        let store = Arc::new(MemoryStore::new(connection));
        let queue = Queue::new("tasks", store.clone());

        connector.set_online(false);
        let pending = tokio::spawn({
            let queue = queue.clone();
            async move { queue.enqueue("send-email", json!({"to": "a@b.com"})).await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!pending.is_finished());

        connector.set_online(true);
        let job_id = pending.await.unwrap().unwrap().job_id;
        assert!(store.get("tasks", &job_id).await.unwrap().is_some());
        assert_eq!(store.counts("tasks").waiting, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn outage_on_a_live_connection_honours_the_ready_timeout() {
        let connector = MemoryConnector::new();
        let connection = BrokerConnection::connect(connector.clone(), ConnectOptions::default());
        connection.acquire().await.unwrap();
        let queue = Queue::new("tasks", Arc::new(MemoryStore::new(connection)))
            .with_ready_timeout(Some(Duration::from_millis(300)));

        connector.set_online(false);
        assert!(matches!(
            queue.enqueue("send-email", json!({})).await,
            Err(JobQueueError::Unavailable)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_timeout_fails_with_unavailable() {
        let connector = MemoryConnector::new();
        connector.set_online(false);
        let store = Arc::new(MemoryStore::new(BrokerConnection::connect(
            connector,
            ConnectOptions::default(),
        )));
        let queue = Queue::new("tasks", store).with_ready_timeout(Some(Duration::from_millis(300)));

        let err = queue.enqueue("send-email", json!({})).await.unwrap_err();
        assert!(matches!(err, JobQueueError::Unavailable));
        assert_eq!(err.to_string(), "connection unavailable");
    }
}

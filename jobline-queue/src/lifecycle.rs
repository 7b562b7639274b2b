//! Lifecycle controller: starts the worker/queue pair once the broker is
//! ready and runs the shutdown sequence.
//!
//! Shutdown order is fixed: drain the worker, wait for the in-flight job
//! (optionally bounded by a grace period), then close the broker connection.

use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};

use jobline_broker::ConnectionState;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::{EngineContext, EngineSettings};
use crate::queue::Queue;
use crate::worker::Worker;

/// Summary of how the engine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Whether the worker/queue pair was ever created.
    pub worker_started: bool,
    /// The grace period ran out and the worker was aborted.
    pub forced: bool,
    pub jobs_processed: u64,
}

struct Started {
    worker: Arc<Worker>,
    queue: Queue,
    handle: Mutex<Option<JoinHandle<()>>>,
}

pub struct Lifecycle {
    context: EngineContext,
    settings: EngineSettings,
    started: OnceLock<Started>,
    /// Held across the start of the pair so shutdown never misses it.
    closing: Mutex<bool>,
    report: OnceCell<ShutdownReport>,
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("settings", &self.settings)
            .field("started", &self.started.get().is_some())
            .field("closing", &*self.closing.lock().unwrap_or_else(|e| e.into_inner()))
            .finish()
    }
}

impl Lifecycle {
    pub fn new(context: EngineContext, settings: EngineSettings) -> Self {
        Self {
            context,
            settings,
            started: OnceLock::new(),
            closing: Mutex::new(false),
            report: OnceCell::new(),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn worker(&self) -> Option<Arc<Worker>> {
        self.started.get().map(|s| s.worker.clone())
    }

    pub fn queue(&self) -> Option<Queue> {
        self.started.get().map(|s| s.queue.clone())
    }

    /// Handles a `ready` transition. Creates and starts the worker/queue pair
    /// the first time; later calls are no-ops. Returns whether this call
    /// created the pair.
    pub fn on_ready(&self) -> bool {
        let closing = self.closing.lock().unwrap_or_else(|e| e.into_inner());
        if *closing {
            debug!("ignoring ready event during shutdown");
            return false;
        }
        if self.started.get().is_some() {
            debug!("worker already initialized, ignoring ready event");
            return false;
        }

        let mut created = false;
        self.started.get_or_init(|| {
            created = true;
            self.start_pair()
        });
        drop(closing);
        created
    }

    fn start_pair(&self) -> Started {
        let worker = Arc::new(Worker::new(
            self.settings.worker_options(),
            self.context.store.clone(),
            self.context.registry.clone(),
            self.context.observer.clone(),
        ));
        let queue = Queue::new(self.settings.queue_name.as_str(), self.context.store.clone())
            .with_ready_timeout(self.settings.ready_timeout);

        let running = worker.clone();
        let handle = tokio::spawn(async move { running.run().await });
        info!(
            queue = %self.settings.queue_name,
            consumer = %self.settings.consumer_name,
            "worker and queue initialized"
        );

        Started {
            worker,
            queue,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Drives the engine until `shutdown` resolves or the broker connection
    /// closes for good, then runs the shutdown sequence.
    pub async fn run<F>(&self, shutdown: F) -> ShutdownReport
    where
        F: Future<Output = ()>,
    {
        // Subscribe before looking at the current state so no transition
        // falls between the two.
        let mut events = self.context.connection.subscribe();
        let initial = self.context.connection.state();
        if initial.is_ready() {
            self.on_ready();
        }

        if !initial.is_closed() {
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("termination signal received, shutting down");
                        break;
                    }
                    event = events.recv() => match event {
                        Ok(ConnectionState::Ready) => {
                            self.on_ready();
                        }
                        Ok(ConnectionState::Closed) => {
                            warn!("broker connection closed, shutting down");
                            break;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "missed connection events, resyncing");
                            let current = self.context.connection.state();
                            if current.is_ready() {
                                self.on_ready();
                            } else if current.is_closed() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        }

        self.shutdown().await
    }

    /// Drain, wait, close. Safe to call more than once; later calls return
    /// the first report.
    pub async fn shutdown(&self) -> ShutdownReport {
        *self.report.get_or_init(|| self.shutdown_sequence()).await
    }

    async fn shutdown_sequence(&self) -> ShutdownReport {
        *self.closing.lock().unwrap_or_else(|e| e.into_inner()) = true;

        let report = match self.started.get() {
            None => ShutdownReport {
                worker_started: false,
                forced: false,
                jobs_processed: 0,
            },
            Some(started) => {
                started.worker.drain();
                let handle = started
                    .handle
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .take();
                let forced = match handle {
                    Some(handle) => self.await_drain(&started.worker, handle).await,
                    None => false,
                };
                ShutdownReport {
                    worker_started: true,
                    forced,
                    jobs_processed: started.worker.jobs_processed(),
                }
            }
        };

        self.context.connection.close().await;
        info!(
            worker_started = report.worker_started,
            forced = report.forced,
            jobs_processed = report.jobs_processed,
            "shutdown complete"
        );
        report
    }

    /// Returns true if the worker had to be aborted.
    async fn await_drain(&self, worker: &Worker, mut handle: JoinHandle<()>) -> bool {
        let joined = match self.settings.shutdown_grace {
            None => handle.await,
            Some(grace) => match tokio::time::timeout(grace, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(grace_ms = grace.as_millis() as u64, "drain exceeded grace period, forcing stop");
                    handle.abort();
                    worker.abort_in_flight();
                    return true;
                }
            },
        };
        if let Err(err) = joined {
            warn!(error = %err, "worker task ended abnormally");
        }
        false
    }
}

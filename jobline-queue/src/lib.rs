//! Job queue engine: producer, worker and lifecycle controller.
//!
//! Jobs are submitted through a [`Queue`], stored by a [`JobStore`] (Redis or
//! in-process), pulled one at a time by a [`Worker`] and dispatched to the
//! [`JobHandler`] registered for their name. Each processed job produces one
//! [`JobEvent`] for the configured [`JobObserver`]. The [`Lifecycle`]
//! controller creates the worker/queue pair once the broker connection is
//! ready and owns the shutdown sequence.
//!
//! # Architecture
//!
//! - [`EngineContext`] - connection, store, registry and observer shared by the engine
//! - [`HandlerRegistry`] - frozen job-name to handler mapping
//! - [`Queue`] - enqueues jobs; blocks while the broker is unavailable
//! - [`Worker`] - `uninitialized -> running -> draining -> stopped`
//! - [`Lifecycle`] - idempotent startup, drain-then-close shutdown
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use jobline_broker::{ConnectOptions, MemoryConnector};
//! use jobline_queue::{
//!     async_trait, EngineContext, EngineSettings, HandlerRegistry, Job, JobHandler,
//!     JobQueueError, Lifecycle, LogObserver,
//! };
//! use serde_json::{json, Value};
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl JobHandler for Hello {
//!     fn job_name(&self) -> &str {
//!         "hello"
//!     }
//!
//!     async fn handle(&self, job: &Job) -> Result<Value, JobQueueError> {
//!         Ok(json!({"greeted": job.payload}))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut builder = HandlerRegistry::builder();
//!     builder.register(Hello).unwrap();
//!
//!     let ctx = EngineContext::in_memory(
//!         MemoryConnector::new(),
//!         ConnectOptions::default(),
//!         Arc::new(builder.build()),
//!         Arc::new(LogObserver),
//!     );
//!     let lifecycle = Lifecycle::new(ctx, EngineSettings::default());
//!     let report = lifecycle.run(async { let _ = tokio::signal::ctrl_c().await; }).await;
//!     println!("processed {} jobs", report.jobs_processed);
//! }
//! ```

mod context;
mod error;
mod handler;
mod lifecycle;
mod memory;
mod observer;
mod queue;
mod redis_store;
mod registry;
mod store;
mod types;
mod worker;

pub use context::{EngineContext, EngineSettings};
pub use error::JobQueueError;
pub use handler::JobHandler;
pub use lifecycle::{Lifecycle, ShutdownReport};
pub use memory::{MemoryStore, QueueCounts};
pub use observer::{ChannelObserver, JobObserver, LogObserver, Observers};
pub use queue::Queue;
pub use redis_store::{RedisStore, DEFAULT_KEY_PREFIX, DEFAULT_POLL_INTERVAL};
pub use registry::{HandlerRegistry, HandlerRegistryBuilder};
pub use store::JobStore;
pub use types::{EnqueueResult, Job, JobEvent, JobId, JobOutcome, JobRequest, JobState};
pub use worker::{default_consumer_name, Worker, WorkerOptions, WorkerState, DEFAULT_FETCH_WAIT, DEFAULT_QUEUE_NAME};

// Re-export async_trait for convenience when implementing JobHandler
pub use async_trait::async_trait;

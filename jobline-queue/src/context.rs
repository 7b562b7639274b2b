//! Everything a running engine shares, built once by the process entry point.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jobline_broker::{
    BrokerConfig, BrokerConnection, BrokerError, ConnectOptions, ConnectionControl, MemoryConnector,
    RedisConnector,
};

use crate::memory::MemoryStore;
use crate::observer::JobObserver;
use crate::redis_store::RedisStore;
use crate::registry::HandlerRegistry;
use crate::store::JobStore;
use crate::worker::{default_consumer_name, WorkerOptions, DEFAULT_FETCH_WAIT, DEFAULT_QUEUE_NAME};

/// Shared handles passed to the lifecycle controller, worker and queue.
///
/// The lifecycle controller is the only owner that opens or closes the
/// connection; the store merely borrows it for commands.
#[derive(Clone)]
pub struct EngineContext {
    pub connection: Arc<dyn ConnectionControl>,
    pub store: Arc<dyn JobStore>,
    pub registry: Arc<HandlerRegistry>,
    pub observer: Arc<dyn JobObserver>,
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("connection", &self.connection.state())
            .field("registry", &self.registry)
            .finish()
    }
}

impl EngineContext {
    pub fn new(
        connection: Arc<dyn ConnectionControl>,
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        observer: Arc<dyn JobObserver>,
    ) -> Self {
        Self {
            connection,
            store,
            registry,
            observer,
        }
    }

    /// Engine on a Redis broker. Starts connecting immediately.
    pub fn redis(
        config: &BrokerConfig,
        key_prefix: &str,
        poll_interval: Duration,
        registry: Arc<HandlerRegistry>,
        observer: Arc<dyn JobObserver>,
    ) -> Result<Self, BrokerError> {
        let connector = RedisConnector::new(config)?;
        let connection = BrokerConnection::connect(connector, ConnectOptions::from(config));
        let store = RedisStore::new(connection.clone(), key_prefix).with_poll_interval(poll_interval);
        Ok(Self::new(connection, Arc::new(store), registry, observer))
    }

    /// Engine on the in-process broker behind `connector`.
    pub fn in_memory(
        connector: MemoryConnector,
        options: ConnectOptions,
        registry: Arc<HandlerRegistry>,
        observer: Arc<dyn JobObserver>,
    ) -> Self {
        let connection = BrokerConnection::connect(connector, options);
        let store = MemoryStore::new(connection.clone());
        Self::new(connection, Arc::new(store), registry, observer)
    }
}

/// Tunables for the worker/queue pair.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub queue_name: String,
    pub consumer_name: String,
    pub fetch_wait: Duration,
    /// Off by default: handlers run until they finish.
    pub job_timeout: Option<Duration>,
    /// Off by default: shutdown waits for the in-flight job however long it takes.
    pub shutdown_grace: Option<Duration>,
    /// Off by default: producers block until the broker is ready.
    pub ready_timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_owned(),
            consumer_name: default_consumer_name(),
            fetch_wait: DEFAULT_FETCH_WAIT,
            job_timeout: None,
            shutdown_grace: None,
            ready_timeout: None,
        }
    }
}

impl EngineSettings {
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            queue: self.queue_name.clone(),
            consumer: self.consumer_name.clone(),
            fetch_wait: self.fetch_wait,
            job_timeout: self.job_timeout,
        }
    }
}

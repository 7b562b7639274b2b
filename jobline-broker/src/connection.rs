//! Supervised broker connection.
//!
//! A [`BrokerConnection`] never fails to construct. It spawns a supervisor
//! task that dials the broker through a [`Connector`], publishes state
//! transitions, and redials with [`BackoffPolicy`] delays whenever a user
//! reports that the current connection broke. Users borrow the live
//! connection with [`BrokerConnection::acquire`], which waits for `ready`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::state::ConnectionState;

const EVENT_CAPACITY: usize = 64;

/// Dials the broker. Implemented for Redis and for the in-memory broker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Clone + Send + Sync + 'static;

    /// Address for log lines, with credentials removed.
    fn describe(&self) -> String;

    async fn connect(&self) -> Result<Self::Connection, BrokerError>;
}

/// Open/close handle the lifecycle controller holds on the connection.
#[async_trait]
pub trait ConnectionControl: Send + Sync {
    fn state(&self) -> ConnectionState;

    fn subscribe(&self) -> broadcast::Receiver<ConnectionState>;

    /// Stops reconnecting and drops the live connection. Idempotent.
    async fn close(&self);
}

/// Options for [`BrokerConnection::connect`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    pub backoff: BackoffPolicy,
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&BrokerConfig> for ConnectOptions {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            backoff: config.backoff(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// A live connection tagged with the dial it came from.
#[derive(Debug, Clone)]
pub struct Lease<T> {
    pub connection: T,
    pub generation: u64,
}

#[derive(Debug)]
struct Breakage {
    generation: u64,
    cause: String,
    failover: bool,
}

struct Shared<C: Connector> {
    connector: C,
    options: ConnectOptions,
    address: String,
    current: RwLock<Option<Lease<C::Connection>>>,
    generation: AtomicU64,
    exhausted_after: AtomicU32,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionState>,
    broken_tx: mpsc::UnboundedSender<Breakage>,
    close: CancellationToken,
}

impl<C: Connector> Shared<C> {
    fn transition(&self, next: ConnectionState) {
        match &next {
            ConnectionState::Connecting => debug!(address = %self.address, "connecting to broker"),
            ConnectionState::Ready => info!(address = %self.address, "broker connection ready"),
            ConnectionState::Error { cause } => {
                warn!(address = %self.address, %cause, "broker connection error")
            }
            ConnectionState::Closed => info!(address = %self.address, "broker connection closed"),
        }
        self.state_tx.send_replace(next.clone());
        // No subscribers is fine.
        let _ = self.events.send(next);
    }

    fn install(&self, lease: Lease<C::Connection>) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(lease);
    }

    fn uninstall_if(&self, generation: Option<u64>) -> bool {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        match (&*guard, generation) {
            (Some(lease), Some(g)) if lease.generation != g => false,
            (None, _) => false,
            _ => {
                *guard = None;
                true
            }
        }
    }

    fn current(&self) -> Option<Lease<C::Connection>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// The single logical broker connection of a process.
pub struct BrokerConnection<C: Connector> {
    shared: Arc<Shared<C>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> std::fmt::Debug for BrokerConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("address", &self.shared.address)
            .field("state", &*self.shared.state_tx.borrow())
            .finish()
    }
}

impl<C: Connector> BrokerConnection<C> {
    /// Starts connecting in the background and returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(connector: C, options: ConnectOptions) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (broken_tx, broken_rx) = mpsc::unbounded_channel();
        let address = connector.describe();

        let shared = Arc::new(Shared {
            connector,
            options,
            address,
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            exhausted_after: AtomicU32::new(0),
            state_tx,
            events,
            broken_tx,
            close: CancellationToken::new(),
        });

        let handle = tokio::spawn(supervise(shared.clone(), broken_rx));

        Arc::new(Self {
            shared,
            supervisor: Mutex::new(Some(handle)),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Discrete state transitions from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.shared.events.subscribe()
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn connector(&self) -> &C {
        &self.shared.connector
    }

    /// Waits until the connection is ready and returns it.
    ///
    /// Fails only once the connection has been closed, either explicitly or
    /// because the retry budget ran out.
    pub async fn acquire(&self) -> Result<Lease<C::Connection>, BrokerError> {
        let mut state_rx = self.shared.state_tx.subscribe();
        loop {
            if let Some(lease) = self.shared.current() {
                return Ok(lease);
            }
            if state_rx.borrow_and_update().is_closed() {
                return Err(self.closed_error());
            }
            if state_rx.changed().await.is_err() {
                return Err(self.closed_error());
            }
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up with
    /// [`BrokerError::ConnectTimeout`] after `limit`.
    pub async fn acquire_within(&self, limit: Duration) -> Result<Lease<C::Connection>, BrokerError> {
        tokio::time::timeout(limit, self.acquire())
            .await
            .map_err(|_| BrokerError::ConnectTimeout(limit))?
    }

    /// Reports a failed command on the connection from `generation`.
    ///
    /// Errors that require a reconnect tear that connection down and wake the
    /// supervisor. Reports about an older generation are ignored.
    pub fn report_error(&self, generation: u64, error: &BrokerError) {
        if !error.requires_reconnect() {
            return;
        }
        if !self.shared.uninstall_if(Some(generation)) {
            debug!(generation, "ignoring error report for a retired connection");
            return;
        }
        let _ = self.shared.broken_tx.send(Breakage {
            generation,
            cause: error.to_string(),
            failover: error.is_failover(),
        });
    }

    pub async fn close(&self) {
        self.shared.close.cancel();
        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "broker supervisor ended abnormally");
            }
        }
    }

    fn closed_error(&self) -> BrokerError {
        match self.shared.exhausted_after.load(Ordering::Acquire) {
            0 => BrokerError::Closed,
            attempts => BrokerError::RetriesExhausted { attempts },
        }
    }
}

impl<C: Connector> Drop for BrokerConnection<C> {
    fn drop(&mut self) {
        self.shared.close.cancel();
    }
}

#[async_trait]
impl<C: Connector> ConnectionControl for BrokerConnection<C> {
    fn state(&self) -> ConnectionState {
        BrokerConnection::state(self)
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        BrokerConnection::subscribe(self)
    }

    async fn close(&self) {
        BrokerConnection::close(self).await
    }
}

async fn supervise<C: Connector>(shared: Arc<Shared<C>>, mut broken_rx: mpsc::UnboundedReceiver<Breakage>) {
    let policy = shared.options.backoff;
    let mut retries: u32 = 0;
    let mut immediate = false;

    'dial: loop {
        if retries > 0 && !immediate {
            let delay = policy.delay_for(retries);
            debug!(attempt = retries, delay_ms = delay.as_millis() as u64, "waiting before reconnect");
            tokio::select! {
                _ = shared.close.cancelled() => break 'dial,
                _ = tokio::time::sleep(delay) => {}
            }
        } else if immediate {
            info!(attempt = retries, "broker failover detected, reconnecting immediately");
        }
        immediate = false;

        if shared.close.is_cancelled() {
            break;
        }
        shared.transition(ConnectionState::Connecting);

        let timeout = shared.options.connect_timeout;
        let dialed = tokio::select! {
            _ = shared.close.cancelled() => break 'dial,
            r = tokio::time::timeout(timeout, shared.connector.connect()) => r,
        };
        let dialed = dialed.unwrap_or(Err(BrokerError::ConnectTimeout(timeout)));

        match dialed {
            Ok(connection) => {
                // Anything still queued refers to an earlier generation.
                while broken_rx.try_recv().is_ok() {}

                let generation = shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
                shared.install(Lease {
                    connection,
                    generation,
                });
                retries = 0;
                shared.transition(ConnectionState::Ready);

                let breakage = loop {
                    tokio::select! {
                        _ = shared.close.cancelled() => break 'dial,
                        msg = broken_rx.recv() => match msg {
                            Some(b) if b.generation == generation => break b,
                            Some(_) => continue,
                            None => break 'dial,
                        },
                    }
                };
                shared.uninstall_if(None);
                immediate = breakage.failover;
                shared.transition(ConnectionState::Error {
                    cause: breakage.cause,
                });
            }
            Err(err) => {
                immediate = err.is_failover();
                shared.transition(ConnectionState::Error {
                    cause: err.to_string(),
                });
            }
        }

        retries = retries.saturating_add(1);
        if policy.exhausted(retries) {
            let attempts = retries;
            warn!(attempts, "giving up on broker connection");
            shared
                .exhausted_after
                .store(attempts.max(1), Ordering::Release);
            break;
        }
    }

    shared.uninstall_if(None);
    shared.transition(ConnectionState::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    /// Connector that replays a script of results and records dial times.
    struct Scripted {
        script: Mutex<VecDeque<Result<u32, BrokerError>>>,
        dials: Arc<Mutex<Vec<Instant>>>,
    }

    impl Scripted {
        fn new(script: Vec<Result<u32, BrokerError>>) -> (Self, Arc<Mutex<Vec<Instant>>>) {
            let dials = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    script: Mutex::new(script.into()),
                    dials: dials.clone(),
                },
                dials,
            )
        }
    }

    #[async_trait]
    impl Connector for Scripted {
        type Connection = u32;

        fn describe(&self) -> String {
            "scripted".into()
        }

        async fn connect(&self) -> Result<u32, BrokerError> {
            self.dials.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(99))
        }
    }

    fn down() -> Result<u32, BrokerError> {
        Err(BrokerError::Disconnected("refused".into()))
    }

    fn gaps(dials: &[Instant]) -> Vec<u64> {
        dials
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_linear_backoff_until_ready() {
        let (connector, dials) = Scripted::new(vec![down(), down(), down(), Ok(1)]);
        let conn = BrokerConnection::connect(connector, ConnectOptions::default());

        let lease = conn.acquire().await.expect("eventually ready");
        assert_eq!(lease.connection, 1);
        assert!(conn.state().is_ready());
        assert_eq!(gaps(&dials.lock().unwrap()), vec![50, 100, 150]);

        conn.close().await;
        assert!(conn.state().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn read_only_failover_redials_immediately() {
        let (connector, dials) = Scripted::new(vec![
            down(),
            Err(BrokerError::ReadOnly("replica".into())),
            Ok(7),
        ]);
        let conn = BrokerConnection::connect(connector, ConnectOptions::default());

        conn.acquire().await.expect("ready");
        assert_eq!(gaps(&dials.lock().unwrap()), vec![50, 0]);
        conn.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reported_breakage_reconnects_once_per_generation() {
        let (connector, dials) = Scripted::new(vec![Ok(1), Ok(2)]);
        let conn = BrokerConnection::connect(connector, ConnectOptions::default());
        let mut events = conn.subscribe();

        let first = conn.acquire().await.unwrap();
        let lost = BrokerError::Disconnected("reset".into());
        conn.report_error(first.generation, &lost);
        // A second report for the same dead connection is a no-op.
        conn.report_error(first.generation, &lost);

        let second = conn.acquire().await.unwrap();
        assert_eq!(second.connection, 2);
        assert_eq!(second.generation, first.generation + 1);
        assert_eq!(dials.lock().unwrap().len(), 2);

        // Stale report for the old generation must not kill the new one.
        conn.report_error(first.generation, &lost);
        assert!(conn.state().is_ready());

        let mut seen = Vec::new();
        while let Ok(state) = events.try_recv() {
            seen.push(state);
        }
        assert!(seen.contains(&ConnectionState::Error { cause: lost.to_string() }));
        assert_eq!(seen.last(), Some(&ConnectionState::Ready));
        conn.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn non_connectivity_errors_keep_connection() {
        let (connector, _) = Scripted::new(vec![Ok(1)]);
        let conn = BrokerConnection::connect(connector, ConnectOptions::default());
        let lease = conn.acquire().await.unwrap();

        conn.report_error(lease.generation, &BrokerError::Protocol("bad reply".into()));
        assert_eq!(conn.acquire().await.unwrap().generation, lease.generation);
        conn.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_closes_after_first_failure() {
        let (connector, dials) = Scripted::new(vec![down()]);
        let options = ConnectOptions::from(&BrokerConfig::default().fail_fast());
        let conn = BrokerConnection::connect(connector, options);

        let err = conn.acquire().await.unwrap_err();
        assert!(matches!(err, BrokerError::RetriesExhausted { attempts: 1 }));
        assert!(conn.state().is_closed());
        assert_eq!(dials.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_after_close_fails() {
        let (connector, _) = Scripted::new(vec![Ok(1)]);
        let conn = BrokerConnection::connect(connector, ConnectOptions::default());
        conn.acquire().await.unwrap();
        conn.close().await;
        conn.close().await;

        assert!(matches!(conn.acquire().await, Err(BrokerError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_within_times_out_while_down() {
        let script = (0..1000).map(|_| down()).collect();
        let (connector, _) = Scripted::new(script);
        let conn = BrokerConnection::connect(connector, ConnectOptions::default());

        let err = conn.acquire_within(Duration::from_millis(500)).await.unwrap_err();
        assert!(matches!(err, BrokerError::ConnectTimeout(_)));
        conn.close().await;
    }
}

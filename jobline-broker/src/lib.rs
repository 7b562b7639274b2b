//! Broker connection management for the jobline engine.
//!
//! The process owns exactly one [`BrokerConnection`]. It connects in the
//! background, publishes [`ConnectionState`] transitions, and reconnects with
//! a linear [`BackoffPolicy`] (`min(k * 50ms, 2s)` by default). A read-only
//! reply from the broker means a failover happened and triggers an immediate
//! redial instead of a backoff wait.
//!
//! - [`Connector`] - dials a concrete broker ([`RedisConnector`], [`MemoryConnector`])
//! - [`BrokerConnection`] - supervised connection, [`acquire`](BrokerConnection::acquire) waits for ready
//! - [`ConnectionControl`] - object-safe open/close handle for the lifecycle controller
//! - [`ping`] - one-shot health check without retries

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod memory;
pub mod redis_connector;
pub mod state;
pub mod utils;

pub use backoff::BackoffPolicy;
pub use config::{BrokerConfig, DEFAULT_BROKER_URL};
pub use connection::{BrokerConnection, ConnectOptions, ConnectionControl, Connector, Lease};
pub use error::BrokerError;
pub use memory::{MemoryConnector, MemoryLink};
pub use redis_connector::{ping, RedisConnector};
pub use state::ConnectionState;

use std::num::ParseIntError;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while configuring, establishing or using the broker connection.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("environment variable {0} contains invalid unicode")]
    InvalidUnicode(String),
    #[error("failed to parse numeric environment variable {var}: {source}")]
    InvalidNumber {
        var: String,
        #[source]
        source: ParseIntError,
    },
    #[error("broker url cannot be empty")]
    EmptyUrl,
    #[error("invalid broker url: {0}")]
    InvalidUrl(String),
    #[error("broker connection lost: {0}")]
    Disconnected(String),
    #[error("broker is read-only: {0}")]
    ReadOnly(String),
    #[error("connect attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("broker connection closed")]
    Closed,
    #[error("broker unreachable after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("unexpected broker reply: {0}")]
    Protocol(String),
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

impl BrokerError {
    /// The broker reported a read-only replica, i.e. a failover happened and
    /// the current endpoint is no longer the primary.
    pub fn is_failover(&self) -> bool {
        match self {
            Self::ReadOnly(_) => true,
            Self::Redis(err) => {
                err.kind() == redis::ErrorKind::ReadOnly || err.code() == Some("READONLY")
            }
            _ => false,
        }
    }

    /// Whether the error means the current connection is unusable and a
    /// reconnect is required.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Disconnected(_) | Self::ConnectTimeout(_) => true,
            Self::Redis(err) => {
                err.is_io_error()
                    || err.is_connection_dropped()
                    || err.is_connection_refusal()
                    || err.is_timeout()
            }
            _ => false,
        }
    }

    /// Whether a reconnect should be triggered by this error.
    #[inline]
    pub fn requires_reconnect(&self) -> bool {
        self.is_failover() || self.is_connectivity()
    }
}

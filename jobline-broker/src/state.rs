use std::fmt;

/// Lifecycle of the broker connection as seen by its users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    Error { cause: String },
    Closed,
}

impl ConnectionState {
    #[inline]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    #[inline]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Ready => f.write_str("ready"),
            Self::Error { cause } => write!(f, "error({cause})"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

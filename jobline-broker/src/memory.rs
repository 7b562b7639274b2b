//! In-process broker endpoint.
//!
//! Stands in for Redis in tests and in `--in-memory` mode. The switches let
//! callers take the "broker" offline or flip it read-only to exercise the
//! reconnect paths.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::Connector;
use crate::error::BrokerError;

#[derive(Debug)]
struct Switches {
    online: AtomicBool,
    read_only: AtomicBool,
    dials: AtomicU32,
}

/// Connector for the in-memory broker. Clones share the same switches.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    switches: Arc<Switches>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            switches: Arc::new(Switches {
                online: AtomicBool::new(true),
                read_only: AtomicBool::new(false),
                dials: AtomicU32::new(0),
            }),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.switches.online.store(online, Ordering::SeqCst);
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.switches.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Number of successful dials so far.
    pub fn dial_count(&self) -> u32 {
        self.switches.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Connection = MemoryLink;

    fn describe(&self) -> String {
        "memory://local".to_owned()
    }

    async fn connect(&self) -> Result<MemoryLink, BrokerError> {
        if !self.switches.online.load(Ordering::SeqCst) {
            return Err(BrokerError::Disconnected("memory broker is offline".into()));
        }
        // Dialing again lands on the new primary.
        self.switches.read_only.store(false, Ordering::SeqCst);
        self.switches.dials.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryLink {
            switches: self.switches.clone(),
        })
    }
}

/// Handle returned by [`MemoryConnector::connect`].
#[derive(Debug, Clone)]
pub struct MemoryLink {
    switches: Arc<Switches>,
}

impl MemoryLink {
    /// Fails the way a real command would when the broker is unreachable or
    /// has been demoted to a replica.
    pub fn check(&self, writes: bool) -> Result<(), BrokerError> {
        if !self.switches.online.load(Ordering::SeqCst) {
            return Err(BrokerError::Disconnected("memory broker is offline".into()));
        }
        if writes && self.switches.read_only.load(Ordering::SeqCst) {
            return Err(BrokerError::ReadOnly(
                "You can't write against a read only replica.".into(),
            ));
        }
        Ok(())
    }
}

//! Reconnect delay policy.

use std::time::Duration;

/// Linear backoff with a ceiling: the k-th reconnect attempt waits
/// `min(k * step, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    step: Duration,
    cap: Duration,
    max_retries: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_millis(2000), None)
    }
}

impl BackoffPolicy {
    pub const fn new(step: Duration, cap: Duration, max_retries: Option<u32>) -> Self {
        Self {
            step,
            cap,
            max_retries,
        }
    }

    /// Delay before reconnect attempt number `attempt` (1-based). Attempt 0
    /// is the initial connect and never waits.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt).min(self.cap)
    }

    /// True once `attempt` goes past the configured retry budget.
    #[inline]
    pub fn exhausted(&self, attempt: u32) -> bool {
        matches!(self.max_retries, Some(max) if attempt > max)
    }

    #[inline]
    pub const fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }
}

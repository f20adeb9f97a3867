//! Retry policies for dialing pools.

use std::fmt;
use std::time::Duration;

/// Decides whether, and after how long, a failed pool dial is retried.
pub trait RetryPolicy: fmt::Debug + Send + Sync {
    /// Delay before the next attempt, given how many attempts have failed so
    /// far (starting at 1). `None` gives up.
    fn next_delay(&self, failed_attempts: u32) -> Option<Duration>;
}

/// Dial once and give up on failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _failed_attempts: u32) -> Option<Duration> {
        None
    }
}

/// Bounded retries with doubling delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Delay after the first failure
    pub initial: Duration,
    /// Upper bound on any single delay
    pub max: Duration,
    /// Total number of attempts, including the first
    pub max_attempts: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts == 0 || failed_attempts >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(failed_attempts - 1).unwrap_or(u32::MAX);
        Some(self.initial.saturating_mul(factor).min(self.max))
    }
}

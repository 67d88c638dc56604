//! Bounded exponential backoff for score write-backs

use std::time::Duration;

/// Retry policy for transient write-back failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts before the update is parked in the pending queue.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after the given zero-based failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        let delay = self.initial_backoff.saturating_mul(1u32 << exp);
        delay.min(self.max_backoff)
    }
}

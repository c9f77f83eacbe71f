//! Bounded retry policy for upstream calls.

use std::time::Duration;

/// How many times to try an upstream call and how long to wait in between.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Fixed delay before each retry.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// Attempt budget, never zero.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another.
    pub fn has_next(&self, attempt: u32) -> bool {
        attempt < self.attempts()
    }
}

//! Bounded retry with exponential backoff for outbound HTTP calls

use std::time::Duration;

const MAX_BACKOFF_MS: u64 = 30_000;

/// Number of extra attempts and the base delay between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts made after the first one
    pub max_retries: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_backoff_ms: 0,
        }
    }

    pub fn new(max_retries: u32, base_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            base_backoff_ms,
        }
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `attempt` (0-based): base * 2^attempt, capped at 30s
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.min(32));
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
    }
}

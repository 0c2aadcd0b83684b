use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempt cap and inter-attempt delay for chat requests.
///
/// The delay after failed attempt `n` (1-based) is
/// `min(backoff_base_ms * 2^(n-1), backoff_max_ms)`. A zero base disables
/// the delay and retries immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first one.
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, `max_attempts` times in total.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    /// Attempt cap, never below one.
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        Duration::from_millis(compute_backoff(self, attempt.saturating_sub(1)))
    }
}

/// Computes the backoff delay for a given zero-based retry using exponential
/// backoff capped at `backoff_max_ms`.
fn compute_backoff(policy: &RetryPolicy, retry: u32) -> u64 {
    let delay = policy
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(retry));
    delay.min(policy.backoff_max_ms)
}

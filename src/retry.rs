//! Retry policy for node execution.
//!
//! The execute phase of a node runs under a bounded retry loop with an
//! optional fixed delay between attempts. Exhaustion hands the prepare
//! result and the last error to the node's fallback, which is the single
//! place failure policy is decided.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry with a fixed inter-attempt delay.
///
/// `max_attempts` counts total attempts, so the default policy of one
/// attempt means no retry at all. The delay is a timed suspension
/// (`tokio::time::sleep`), never a busy wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total execute attempts before the fallback is invoked (>= 1).
    pub max_attempts: usize,

    /// Delay between consecutive attempts.
    #[serde(with = "humantime_serde")]
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            wait: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given total attempt count (clamped to >= 1).
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Set the inter-attempt delay.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Check whether a 0-indexed attempt is the final one.
    pub fn is_last_attempt(&self, attempt: usize) -> bool {
        attempt + 1 >= self.max_attempts
    }
}

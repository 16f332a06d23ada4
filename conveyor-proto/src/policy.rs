//! Per-task execution policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many delivery attempts an invocation gets before terminal FAILURE.
///
/// The count includes the first delivery: `max_attempts == 1` disables
/// retries entirely.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// No retries: fail terminally on the first handler error.
    pub const fn none() -> Self {
        Self { max_attempts: 1 }
    }

    /// Whether another delivery is allowed after `attempt` (zero-based) failed.
    #[inline]
    pub const fn allows_retry(self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Soft and hard execution time limits.
///
/// Exceeding the soft limit only emits a warning; exceeding the hard limit
/// tears the execution context down and counts as a handler failure.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeLimits {
    pub soft: Option<Duration>,
    pub hard: Option<Duration>,
}

impl TimeLimits {
    pub const fn none() -> Self {
        Self {
            soft: None,
            hard: None,
        }
    }

    pub const fn hard(limit: Duration) -> Self {
        Self {
            soft: None,
            hard: Some(limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_budget_includes_first_delivery() {
        let policy = RetryPolicy::new(3);
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));

        assert!(!RetryPolicy::none().allows_retry(0));
    }
}

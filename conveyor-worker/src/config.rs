//! Worker pool configuration.

use std::time::Duration;

use conveyor_proto::{RetryPolicy, TimeLimits};

/// What to do with an in-flight invocation when shutdown is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Finish the invocation currently executing, then stop.
    Drain,
    /// Interrupt execution and nack, so another worker picks it up.
    Abandon,
}

/// Bounded exponential backoff parameters for transient broker failures.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent slots. The demonstration deployment runs 1; the
    /// engine supports any N >= 1.
    pub concurrency: usize,
    /// Bounded wait per dequeue call; the natural suspension point of an
    /// idle slot.
    pub dequeue_timeout: Duration,
    /// Retry policy for tasks that do not declare their own.
    pub default_retry: RetryPolicy,
    /// Time limits for tasks that do not declare their own.
    pub default_limits: TimeLimits,
    pub shutdown: ShutdownPolicy,
    pub backoff: BackoffConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            dequeue_timeout: Duration::from_secs(1),
            default_retry: RetryPolicy::default(),
            default_limits: TimeLimits::none(),
            shutdown: ShutdownPolicy::Drain,
            backoff: BackoffConfig::default(),
        }
    }
}

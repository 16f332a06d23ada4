//! Handler trait and application-level task errors.

use async_trait::async_trait;
use conveyor_proto::{RetryPolicy, TimeLimits};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::context::TaskContext;

/// Application-level failure inside a task body.
///
/// These are retried up to the task's configured maximum attempts, then
/// recorded as terminal FAILURE.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs(message.into())
    }
}

/// An executable task.
///
/// Handlers are arbitrary user code; the engine assumes nothing about their
/// duration beyond the configured time limits, and requires results to be
/// serializable [`Value`]s. Progress reporting goes through the
/// [`TaskContext`], never directly to the console.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Unique task name. This is the routing key invocations carry.
    fn name(&self) -> &str;

    /// Per-task retry policy; `None` falls back to the worker default.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    /// Per-task time limits; `None` falls back to the worker default.
    fn time_limits(&self) -> Option<TimeLimits> {
        None
    }

    /// Execute the task.
    async fn run(
        &self,
        ctx: &TaskContext,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError>;
}

impl std::fmt::Debug for dyn TaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TaskHandler").field(&self.name()).finish()
    }
}

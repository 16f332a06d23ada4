//! Client-observable task state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a task invocation.
///
/// The serialized spelling (`PENDING`, `STARTED`, `RETRY`, `SUCCESS`,
/// `FAILURE`) is a cross-process contract and must not change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Started,
    Retry,
    Success,
    Failure,
}

impl TaskStatus {
    /// Returns true if no further transitions occur from this status.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Retry => "RETRY",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        })
    }
}

/// Why an invocation failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    /// No handler registered under the invocation's task name. Never retried.
    UnknownTask,
    /// The handler returned an error.
    HandlerError,
    /// The handler exceeded its hard time limit and was torn down.
    TimeLimitExceeded,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::UnknownTask => "UnknownTask",
            Self::HandlerError => "HandlerError",
            Self::TimeLimitExceeded => "TimeLimitExceeded",
        })
    }
}

/// Error details recorded on FAILURE.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Snapshot of an invocation's outcome, keyed by invocation id.
///
/// `value` is present iff SUCCESS; `error` is present iff FAILURE.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub id: Uuid,
    pub status: TaskStatus,
    pub value: Option<Value>,
    pub error: Option<ErrorInfo>,
    pub updated_at: DateTime<Utc>,
}

impl TaskResult {
    /// Synthetic PENDING record for an id the store has no data on.
    ///
    /// An unknown id and a not-yet-started invocation are indistinguishable
    /// here; callers that need the distinction must track ids themselves.
    pub fn pending(id: Uuid) -> Self {
        Self {
            id,
            status: TaskStatus::Pending,
            value: None,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

//! Result store: invocation id -> status and return value, with expiry.
//!
//! Each invocation has exactly one authoritative writer at a time (the
//! worker slot executing it), so writes are last-write-wins and no
//! compare-and-swap is needed. Reads never fail on unknown ids: an expired
//! or never-submitted id reads back as PENDING with no data, which makes
//! "unknown task" indistinguishable from "not yet started". That ambiguity
//! is an accepted limitation of the design, not a bug.

mod error;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conveyor_proto::{ErrorInfo, TaskResult, TaskStatus};
use serde_json::Value;
use uuid::Uuid;

pub use error::ResultStoreError;
pub use memory::MemoryResultStore;

/// Payload accompanying a status write.
#[derive(Debug, Clone, Default)]
pub struct StatusPayload {
    /// Return value; only meaningful with [`TaskStatus::Success`].
    pub value: Option<Value>,
    /// Error details; only meaningful with [`TaskStatus::Failure`].
    pub error: Option<ErrorInfo>,
}

impl StatusPayload {
    pub const fn empty() -> Self {
        Self {
            value: None,
            error: None,
        }
    }

    pub fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    pub fn error(error: ErrorInfo) -> Self {
        Self {
            value: None,
            error: Some(error),
        }
    }
}

/// Key-value store for task outcomes.
///
/// Implementations must tolerate concurrent use from every worker slot and
/// every polling client.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Record a status transition for an invocation.
    ///
    /// Once a terminal status (SUCCESS or FAILURE) has been written, later
    /// writes for the same id are ignored.
    async fn set_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        payload: StatusPayload,
    ) -> Result<(), ResultStoreError>;

    /// Snapshot read. Unknown and expired ids read back as PENDING.
    async fn get(&self, id: Uuid) -> Result<TaskResult, ResultStoreError>;
}

impl std::fmt::Debug for dyn ResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResultStore")
    }
}

/// Open a result store from a URL. Only `memory://` is wired up; a
/// network-backed key-value store would register its scheme here.
pub fn connect(store_url: &str, ttl: Duration) -> Result<Arc<dyn ResultStore>, ResultStoreError> {
    let parsed = url::Url::parse(store_url)
        .map_err(|e| ResultStoreError::InvalidUrl(format!("{store_url}: {e}")))?;
    match parsed.scheme() {
        "memory" => Ok(Arc::new(MemoryResultStore::with_ttl(ttl))),
        other => Err(ResultStoreError::InvalidUrl(format!(
            "unsupported result store scheme: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_accepts_memory_urls() {
        assert!(connect("memory://", Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn connect_rejects_unknown_schemes() {
        assert!(matches!(
            connect("abacus://", Duration::from_secs(60)).unwrap_err(),
            ResultStoreError::InvalidUrl(_)
        ));
    }
}

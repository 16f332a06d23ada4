//! In-memory reference result store with TTL expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use conveyor_proto::{TaskResult, TaskStatus};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::{ResultStore, ResultStoreError, StatusPayload};

/// Default retention for task results.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(60 * 60);

struct Entry {
    result: TaskResult,
    expires_at: Instant,
}

/// In-memory key-value store for task outcomes.
///
/// Entries expire `ttl` after their last write; expired entries are purged
/// lazily on access and read back as PENDING.
pub struct MemoryResultStore {
    entries: RwLock<HashMap<Uuid, Entry>>,
    ttl: Duration,
    closed: AtomicBool,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_RESULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            closed: AtomicBool::new(false),
        }
    }

    /// Simulate losing the store (for failure-path tests).
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    fn check_open(&self) -> Result<(), ResultStoreError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ResultStoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    /// Drop every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }
}

impl Default for MemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn set_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        payload: StatusPayload,
    ) -> Result<(), ResultStoreError> {
        self.check_open()?;
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.get(&id) {
            if existing.expires_at > Instant::now() && existing.result.status.is_terminal() {
                debug!(%id, %status, "ignoring write after terminal status");
                return Ok(());
            }
        }

        entries.insert(
            id,
            Entry {
                result: TaskResult {
                    id,
                    status,
                    value: payload.value,
                    error: payload.error,
                    updated_at: Utc::now(),
                },
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<TaskResult, ResultStoreError> {
        self.check_open()?;
        let entries = self.entries.read().await;
        match entries.get(&id) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(entry.result.clone()),
            // Unknown or expired: indistinguishable from "not yet started".
            _ => Ok(TaskResult::pending(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_proto::{ErrorInfo, ErrorKind};
    use serde_json::json;

    #[tokio::test]
    async fn unknown_id_reads_back_as_pending() {
        let store = MemoryResultStore::new();
        let result = store.get(Uuid::new_v4()).await.unwrap();
        assert_eq!(result.status, TaskStatus::Pending);
        assert!(result.value.is_none());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn status_progression_is_observable() {
        let store = MemoryResultStore::new();
        let id = Uuid::new_v4();

        store
            .set_status(id, TaskStatus::Started, StatusPayload::empty())
            .await
            .unwrap();
        assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Started);

        store
            .set_status(id, TaskStatus::Success, StatusPayload::value(json!(42)))
            .await
            .unwrap();
        let result = store.get(id).await.unwrap();
        assert_eq!(result.status, TaskStatus::Success);
        assert_eq!(result.value, Some(json!(42)));
    }

    #[tokio::test]
    async fn terminal_status_is_immutable() {
        let store = MemoryResultStore::new();
        let id = Uuid::new_v4();

        store
            .set_status(
                id,
                TaskStatus::Failure,
                StatusPayload::error(ErrorInfo::new(ErrorKind::HandlerError, "boom")),
            )
            .await
            .unwrap();
        store
            .set_status(id, TaskStatus::Started, StatusPayload::empty())
            .await
            .unwrap();

        let result = store.get(id).await.unwrap();
        assert_eq!(result.status, TaskStatus::Failure);
        assert_eq!(result.error.unwrap().kind, ErrorKind::HandlerError);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryResultStore::with_ttl(Duration::from_secs(10));
        let id = Uuid::new_v4();
        store
            .set_status(id, TaskStatus::Success, StatusPayload::value(json!("ok")))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Success);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Pending);
        assert_eq!(store.purge_expired().await, 1);
    }

    #[tokio::test]
    async fn closed_store_surfaces_unavailable() {
        let store = MemoryResultStore::new();
        store.close();
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_retryable());
        store.reopen();
        assert!(store.get(Uuid::new_v4()).await.is_ok());
    }
}

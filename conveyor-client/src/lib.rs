//! Producer API.
//!
//! [`Client::submit`] is fire-and-forget: it returns the invocation id as
//! soon as the broker has acked the enqueue. [`Client::submit_and_wait`]
//! additionally polls the result store until the invocation reaches a
//! terminal status or the caller's timeout elapses - and a timeout is a
//! distinguishable outcome ([`ClientError::WaitTimeout`]), never a
//! fabricated FAILURE: "no answer yet" and "task failed" are different
//! states.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use conveyor_broker::{Broker, BrokerError};
use conveyor_proto::{TaskInvocation, TaskResult};
use conveyor_results::{ResultStore, ResultStoreError};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ClientError {
    /// `submit_and_wait` saw no terminal status before the caller's timeout.
    /// The task may still be queued or executing.
    #[error("no terminal result within {0:?}")]
    WaitTimeout(Duration),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    ResultStore(#[from] ResultStoreError),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Poll cadence for `submit_and_wait`.
    pub poll_interval: Duration,
    /// How many times a transient enqueue failure is retried before it
    /// surfaces to the caller.
    pub enqueue_attempts: u32,
    /// Initial backoff between enqueue retries; doubles per attempt.
    pub enqueue_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            enqueue_attempts: 5,
            enqueue_backoff: Duration::from_millis(100),
        }
    }
}

/// Handle for submitting tasks and reading results.
#[derive(Clone)]
pub struct Client {
    broker: Arc<dyn Broker>,
    results: Arc<dyn ResultStore>,
    config: ClientConfig,
}

impl Client {
    pub fn new(broker: Arc<dyn Broker>, results: Arc<dyn ResultStore>) -> Self {
        Self::with_config(broker, results, ClientConfig::default())
    }

    pub fn with_config(
        broker: Arc<dyn Broker>,
        results: Arc<dyn ResultStore>,
        config: ClientConfig,
    ) -> Self {
        Self {
            broker,
            results,
            config,
        }
    }

    /// Fire-and-forget submission. Returns once the broker has acked.
    pub async fn submit(
        &self,
        task: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Uuid, ClientError> {
        self.submit_invocation(TaskInvocation::new(task, args, kwargs))
            .await
    }

    /// Submission with an earliest execution time.
    pub async fn submit_with_eta(
        &self,
        task: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        eta: DateTime<Utc>,
    ) -> Result<Uuid, ClientError> {
        self.submit_invocation(TaskInvocation::new(task, args, kwargs).with_eta(eta))
            .await
    }

    /// Enqueue a fully built invocation, retrying transient broker failures
    /// with bounded backoff. An un-enqueued invocation is never silently
    /// dropped: exhausting the retries surfaces the broker error.
    pub async fn submit_invocation(
        &self,
        invocation: TaskInvocation,
    ) -> Result<Uuid, ClientError> {
        let mut delay = self.config.enqueue_backoff;
        let mut attempt = 0u32;
        loop {
            match self.broker.enqueue(&invocation).await {
                Ok(()) => {
                    debug!(id = %invocation.id, task = %invocation.task, "submitted");
                    return Ok(invocation.id);
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.config.enqueue_attempts => {
                    attempt += 1;
                    warn!(
                        task = %invocation.task,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "enqueue failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Submit, then poll until a terminal status or `timeout`.
    pub async fn submit_and_wait(
        &self,
        task: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        timeout: Duration,
    ) -> Result<TaskResult, ClientError> {
        let id = self.submit(task, args, kwargs).await?;
        self.wait_for(id, timeout).await
    }

    /// Poll an existing invocation until terminal status or `timeout`.
    pub async fn wait_for(&self, id: Uuid, timeout: Duration) -> Result<TaskResult, ClientError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let result = self.results.get(id).await?;
            if result.status.is_terminal() {
                return Ok(result);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ClientError::WaitTimeout(timeout));
            }
            tokio::time::sleep_until(
                (tokio::time::Instant::now() + self.config.poll_interval).min(deadline),
            )
            .await;
        }
    }

    /// Non-blocking snapshot read.
    pub async fn fetch(&self, id: Uuid) -> Result<TaskResult, ClientError> {
        Ok(self.results.get(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_broker::MemoryBroker;
    use conveyor_proto::{ErrorInfo, ErrorKind, TaskStatus};
    use conveyor_results::{MemoryResultStore, StatusPayload};
    use serde_json::json;

    fn client(broker: Arc<MemoryBroker>, results: Arc<MemoryResultStore>) -> Client {
        Client::new(broker, results)
    }

    #[tokio::test]
    async fn submit_returns_an_id_after_enqueue_ack() {
        let broker = Arc::new(MemoryBroker::new());
        let results = Arc::new(MemoryResultStore::new());
        let client = client(broker.clone(), results);

        let id = client
            .submit("add", vec![json!(15), json!(27)], Map::new())
            .await
            .unwrap();

        let delivery = broker
            .dequeue(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.invocation.id, id);
        assert_eq!(delivery.invocation.task, "add");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout_is_distinct_from_failure() {
        let broker = Arc::new(MemoryBroker::new());
        let results = Arc::new(MemoryResultStore::new());
        let client = client(broker, results);

        // No worker is running, so this can never complete.
        let err = client
            .submit_and_wait("add", vec![json!(1), json!(2)], Map::new(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::WaitTimeout(_)));
    }

    #[tokio::test]
    async fn wait_for_returns_the_terminal_result() {
        let broker = Arc::new(MemoryBroker::new());
        let results = Arc::new(MemoryResultStore::new());
        let client = client(broker, results.clone());

        let id = client.submit("add", vec![], Map::new()).await.unwrap();

        let writer = {
            let results = results.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                results
                    .set_status(id, TaskStatus::Failure, StatusPayload::error(
                        ErrorInfo::new(ErrorKind::HandlerError, "boom"),
                    ))
                    .await
                    .unwrap();
            })
        };

        let result = client.wait_for(id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.status, TaskStatus::Failure);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn fetch_on_an_unknown_id_is_pending() {
        let broker = Arc::new(MemoryBroker::new());
        let results = Arc::new(MemoryResultStore::new());
        let client = client(broker, results);

        let result = client.fetch(Uuid::new_v4()).await.unwrap();
        assert_eq!(result.status, TaskStatus::Pending);
        assert!(result.value.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_broker_outage_is_retried_not_dropped() {
        let broker = Arc::new(MemoryBroker::new());
        let results = Arc::new(MemoryResultStore::new());
        let client = client(broker.clone(), results);

        broker.close();
        let reopener = {
            let broker = broker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                broker.reopen();
            })
        };

        let id = client.submit("add", vec![], Map::new()).await.unwrap();
        reopener.await.unwrap();

        let delivery = broker
            .dequeue(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.invocation.id, id);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_broker_error() {
        let broker = Arc::new(MemoryBroker::new());
        let results = Arc::new(MemoryResultStore::new());
        let client = Client::with_config(
            broker.clone(),
            results,
            ClientConfig {
                poll_interval: Duration::from_millis(10),
                enqueue_attempts: 2,
                enqueue_backoff: Duration::from_millis(1),
            },
        );

        broker.close();
        let err = client.submit("add", vec![], Map::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::Broker(BrokerError::Unavailable)));
    }
}

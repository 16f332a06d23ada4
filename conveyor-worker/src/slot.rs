//! One worker slot: dequeue, execute, settle.

use std::sync::Arc;

use conveyor_broker::{Broker, Delivery};
use conveyor_proto::{ErrorInfo, ErrorKind, TaskStatus};
use conveyor_registry::{EventSink, Registry, TaskContext, TaskError};
use conveyor_results::{ResultStore, StatusPayload};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::config::{ShutdownPolicy, WorkerConfig};

enum ExecOutcome {
    Done(Result<Value, TaskError>),
    TimedOut(std::time::Duration),
    Interrupted,
}

pub(crate) struct Slot {
    pub(crate) id: usize,
    pub(crate) config: WorkerConfig,
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) results: Arc<dyn ResultStore>,
    pub(crate) registry: Registry,
    pub(crate) sink: Arc<dyn EventSink>,
}

impl Slot {
    pub(crate) async fn run(self, shutdown: CancellationToken) {
        debug!(slot = self.id, "slot started");
        let mut backoff = Backoff::new(self.config.backoff);

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let dequeued = tokio::select! {
                _ = shutdown.cancelled() => break,
                got = self.broker.dequeue(self.config.dequeue_timeout) => got,
            };

            match dequeued {
                Ok(None) => {}
                Ok(Some(delivery)) => {
                    backoff.reset();
                    self.process(delivery, &shutdown).await;
                }
                Err(e) if e.is_retryable() => {
                    let delay = backoff.next();
                    warn!(
                        slot = self.id,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "broker unavailable, backing off"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    // Non-retryable dequeue errors should not exist in a
                    // sane deployment; log and keep the slot alive.
                    error!(slot = self.id, error = %e, "dequeue failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(backoff.next()) => {}
                    }
                }
            }
        }
        debug!(slot = self.id, "slot stopped");
    }

    async fn process(&self, delivery: Delivery, shutdown: &CancellationToken) {
        let invocation = delivery.invocation.clone();
        let id = invocation.id;

        let handler = match self.registry.lookup(&invocation.task) {
            Ok(handler) => handler,
            Err(e) => {
                // Unknown task: permanent, never retried.
                warn!(slot = self.id, %id, task = %invocation.task, "unknown task");
                self.write_status(
                    id,
                    TaskStatus::Failure,
                    StatusPayload::error(ErrorInfo::new(ErrorKind::UnknownTask, e.to_string())),
                )
                .await;
                self.settle_ack(&delivery).await;
                return;
            }
        };

        let retry = handler.retry_policy().unwrap_or(self.config.default_retry);
        let limits = handler.time_limits().unwrap_or(self.config.default_limits);

        info!(
            slot = self.id,
            %id,
            task = %invocation.task,
            attempt = invocation.attempt,
            "executing"
        );
        self.write_status(id, TaskStatus::Started, StatusPayload::empty())
            .await;

        let ctx = TaskContext::with_sink(
            id,
            invocation.task.clone(),
            invocation.attempt,
            self.sink.clone(),
        );
        let started = Instant::now();
        let work = handler.run(&ctx, invocation.args.clone(), invocation.kwargs.clone());

        let outcome = match self.config.shutdown {
            ShutdownPolicy::Abandon => tokio::select! {
                _ = shutdown.cancelled() => ExecOutcome::Interrupted,
                outcome = run_with_hard_limit(work, limits.hard) => outcome,
            },
            ShutdownPolicy::Drain => run_with_hard_limit(work, limits.hard).await,
        };

        if let Some(soft) = limits.soft {
            let elapsed = started.elapsed();
            if elapsed > soft {
                warn!(
                    slot = self.id,
                    %id,
                    task = %invocation.task,
                    elapsed_ms = elapsed.as_millis() as u64,
                    soft_limit_ms = soft.as_millis() as u64,
                    "soft time limit exceeded"
                );
            }
        }

        match outcome {
            ExecOutcome::Done(Ok(value)) => {
                info!(slot = self.id, %id, task = %invocation.task, "succeeded");
                self.write_status(id, TaskStatus::Success, StatusPayload::value(value))
                    .await;
                self.settle_ack(&delivery).await;
            }
            ExecOutcome::Done(Err(e)) => {
                self.fail_or_retry(
                    &delivery,
                    retry,
                    ErrorInfo::new(ErrorKind::HandlerError, e.to_string()),
                )
                .await;
            }
            ExecOutcome::TimedOut(limit) => {
                self.fail_or_retry(
                    &delivery,
                    retry,
                    ErrorInfo::new(
                        ErrorKind::TimeLimitExceeded,
                        format!("hard time limit of {limit:?} exceeded"),
                    ),
                )
                .await;
            }
            ExecOutcome::Interrupted => {
                // Shutdown with the abandon policy: hand the invocation back
                // rather than losing it.
                info!(slot = self.id, %id, task = %invocation.task, "abandoning on shutdown");
                self.write_status(id, TaskStatus::Retry, StatusPayload::empty())
                    .await;
                self.settle_nack(&delivery).await;
            }
        }
    }

    async fn fail_or_retry(&self, delivery: &Delivery, retry: conveyor_proto::RetryPolicy, error: ErrorInfo) {
        let invocation = &delivery.invocation;
        if retry.allows_retry(invocation.attempt) {
            warn!(
                slot = self.id,
                id = %invocation.id,
                task = %invocation.task,
                attempt = invocation.attempt,
                max_attempts = retry.max_attempts,
                error = %error.message,
                "handler failed, will retry"
            );
            self.write_status(invocation.id, TaskStatus::Retry, StatusPayload::empty())
                .await;
            self.settle_nack(delivery).await;
        } else {
            error!(
                slot = self.id,
                id = %invocation.id,
                task = %invocation.task,
                attempt = invocation.attempt,
                kind = %error.kind,
                error = %error.message,
                "handler failed terminally"
            );
            self.write_status(
                invocation.id,
                TaskStatus::Failure,
                StatusPayload::error(error),
            )
            .await;
            self.settle_ack(delivery).await;
        }
    }

    /// Best-effort result write: the task outcome is authoritative in the
    /// queue, result delivery must never take the slot down.
    async fn write_status(&self, id: Uuid, status: TaskStatus, payload: StatusPayload) {
        if let Err(e) = self.results.set_status(id, status, payload).await {
            warn!(slot = self.id, %id, %status, error = %e, "result write failed");
        }
    }

    async fn settle_ack(&self, delivery: &Delivery) {
        if let Err(e) = self.broker.ack(delivery).await {
            // Likely the visibility window expired first; redelivery wins.
            warn!(slot = self.id, tag = delivery.tag(), error = %e, "ack failed");
        }
    }

    async fn settle_nack(&self, delivery: &Delivery) {
        if let Err(e) = self.broker.nack(delivery).await {
            warn!(slot = self.id, tag = delivery.tag(), error = %e, "nack failed");
        }
    }
}

async fn run_with_hard_limit(
    work: impl std::future::Future<Output = Result<Value, TaskError>>,
    hard: Option<std::time::Duration>,
) -> ExecOutcome {
    match hard {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(result) => ExecOutcome::Done(result),
            // The execution context is torn down here; the handler future is
            // dropped, not left running.
            Err(_) => ExecOutcome::TimedOut(limit),
        },
        None => ExecOutcome::Done(work.await),
    }
}

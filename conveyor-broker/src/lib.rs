//! Queue transport abstraction for task invocations.
//!
//! The engine depends only on enqueue / dequeue / ack / nack semantics, not
//! on a specific queue protocol. Any durable multi-consumer medium reachable
//! by URL can sit behind the [`Broker`] trait; this crate ships the
//! `memory://` reference implementation used by tests and single-process
//! deployments.
//!
//! # Delivery semantics
//!
//! At-least-once: an acked delivery is never redelivered; a nacked or
//! un-acked (crashed consumer) delivery becomes redeliverable after the
//! broker's visibility timeout, with its attempt counter incremented. No
//! ordering is guaranteed across a multi-consumer pool.

mod error;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conveyor_proto::TaskInvocation;

pub use error::BrokerError;
pub use memory::MemoryBroker;

/// One delivery of an invocation to one consumer.
///
/// The tag is opaque and only meaningful to the broker that issued it; it is
/// what `ack` and `nack` settle.
#[derive(Debug)]
pub struct Delivery {
    pub invocation: TaskInvocation,
    tag: u64,
}

impl Delivery {
    pub(crate) fn new(invocation: TaskInvocation, tag: u64) -> Self {
        Self { invocation, tag }
    }

    #[inline]
    pub fn tag(&self) -> u64 {
        self.tag
    }
}

/// Transport for task invocations.
///
/// Implementations must be safe for concurrent use: worker slots share one
/// broker handle and call `dequeue` from independent tasks.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Push an invocation onto the queue. Returns once the broker has
    /// accepted it.
    async fn enqueue(&self, invocation: &TaskInvocation) -> Result<(), BrokerError>;

    /// Pop the next ready invocation, waiting up to `timeout` for one to
    /// become available. `Ok(None)` means the wait elapsed with nothing
    /// ready.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, BrokerError>;

    /// Settle a delivery as done. The invocation is never redelivered.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Return a delivery to the queue for redelivery (attempt incremented).
    async fn nack(&self, delivery: &Delivery) -> Result<(), BrokerError>;
}

impl std::fmt::Debug for dyn Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Broker")
    }
}

/// Open a broker from a URL.
///
/// Currently only `memory://` is wired up; a network-backed queue would
/// register its scheme here.
pub fn connect(broker_url: &str) -> Result<Arc<dyn Broker>, BrokerError> {
    let parsed = url::Url::parse(broker_url)
        .map_err(|e| BrokerError::InvalidUrl(format!("{broker_url}: {e}")))?;
    match parsed.scheme() {
        "memory" => Ok(Arc::new(MemoryBroker::new())),
        other => Err(BrokerError::InvalidUrl(format!(
            "unsupported broker scheme: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_accepts_memory_urls() {
        assert!(connect("memory://").is_ok());
    }

    #[test]
    fn connect_rejects_unknown_schemes() {
        let err = connect("carrier-pigeon://coop:1").unwrap_err();
        assert!(matches!(err, BrokerError::InvalidUrl(_)));
        assert!(!err.is_retryable());
    }
}

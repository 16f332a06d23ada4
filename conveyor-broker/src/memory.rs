//! In-memory reference broker.
//!
//! Single-process stand-in for a durable queue service. It implements the
//! full delivery contract - visibility timeout, ETA delay, attempt counting -
//! so the worker engine and the tests exercise the same semantics a network
//! backend would provide.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use conveyor_proto::{decode_invocation, encode_invocation, TaskInvocation};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{error, warn};

use crate::{Broker, BrokerError, Delivery};

/// Default window after which an un-acked delivery becomes redeliverable.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// A message whose ETA has not arrived yet.
struct Delayed {
    ready_at: Instant,
    bytes: Vec<u8>,
}

// BinaryHeap is a max-heap; order by reversed ready_at for earliest-first.
impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.ready_at.cmp(&self.ready_at)
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at
    }
}

impl Eq for Delayed {}

struct InFlight {
    bytes: Vec<u8>,
    deadline: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Vec<u8>>,
    delayed: BinaryHeap<Delayed>,
    in_flight: HashMap<u64, InFlight>,
}

impl QueueState {
    /// Requeue every in-flight delivery whose visibility window has passed.
    /// The redelivery counts as a fresh attempt: a consumer that crashed
    /// mid-execution still burns retry budget.
    fn reclaim_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(tag, _)| *tag)
            .collect();
        for tag in &expired {
            if let Some(flight) = self.in_flight.remove(tag) {
                match bump_attempt(&flight.bytes) {
                    Ok(bytes) => self.ready.push_back(bytes),
                    Err(e) => error!(tag, error = %e, "dropping unreadable in-flight message"),
                }
            }
        }
        expired.len()
    }

    /// Move delayed messages whose ETA has arrived onto the ready queue.
    fn promote_due(&mut self, now: Instant) {
        while let Some(head) = self.delayed.peek() {
            if head.ready_at > now {
                break;
            }
            if let Some(delayed) = self.delayed.pop() {
                self.ready.push_back(delayed.bytes);
            }
        }
    }

    /// Earliest instant at which the queue state can change on its own.
    fn next_deadline(&self) -> Option<Instant> {
        let delayed = self.delayed.peek().map(|d| d.ready_at);
        let in_flight = self.in_flight.values().map(|f| f.deadline).min();
        match (delayed, in_flight) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

/// Re-encode a stored message with its attempt counter incremented.
fn bump_attempt(bytes: &[u8]) -> Result<Vec<u8>, BrokerError> {
    let mut invocation = decode_invocation(bytes)?;
    invocation.attempt += 1;
    Ok(encode_invocation(&invocation)?)
}

/// In-memory multi-consumer queue with visibility-timeout redelivery.
pub struct MemoryBroker {
    state: Mutex<QueueState>,
    notify: Notify,
    visibility: Duration,
    next_tag: AtomicU64,
    closed: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }

    pub fn with_visibility_timeout(visibility: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            visibility,
            next_tag: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Simulate losing the broker: every subsequent call fails with
    /// [`BrokerError::Unavailable`] and blocked consumers are woken.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Undo [`close`](Self::close).
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    fn check_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BrokerError::Unavailable)
        } else {
            Ok(())
        }
    }

    /// Number of messages currently ready for delivery (test observability).
    pub async fn ready_len(&self) -> usize {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.reclaim_expired(now);
        state.promote_due(now);
        state.ready.len()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, invocation: &TaskInvocation) -> Result<(), BrokerError> {
        self.check_open()?;
        let bytes = encode_invocation(invocation)?;

        let mut state = self.state.lock().await;
        match invocation.eta {
            Some(eta) => {
                let delay = (eta - chrono::Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if delay.is_zero() {
                    state.ready.push_back(bytes);
                } else {
                    state.delayed.push(Delayed {
                        ready_at: Instant::now() + delay,
                        bytes,
                    });
                }
            }
            None => state.ready.push_back(bytes),
        }
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        let wait_deadline = Instant::now() + timeout;
        loop {
            self.check_open()?;

            let next_change = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let reclaimed = state.reclaim_expired(now);
                if reclaimed > 0 {
                    warn!(count = reclaimed, "reclaimed expired in-flight deliveries");
                }
                state.promote_due(now);

                loop {
                    let Some(bytes) = state.ready.pop_front() else {
                        break;
                    };
                    match decode_invocation(&bytes) {
                        Ok(invocation) => {
                            let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
                            state.in_flight.insert(
                                tag,
                                InFlight {
                                    bytes,
                                    deadline: Instant::now() + self.visibility,
                                },
                            );
                            return Ok(Some(Delivery::new(invocation, tag)));
                        }
                        // Poison message: drop it rather than wedge the queue.
                        Err(e) => error!(error = %e, "dropping undecodable message"),
                    }
                }
                state.next_deadline()
            };

            let wake = next_change.map_or(wait_deadline, |t| t.min(wait_deadline));
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake) => {
                    if Instant::now() >= wait_deadline {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(&delivery.tag())
            .map(|_| ())
            .ok_or(BrokerError::UnknownDelivery(delivery.tag()))
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        let flight = state
            .in_flight
            .remove(&delivery.tag())
            .ok_or(BrokerError::UnknownDelivery(delivery.tag()))?;
        let bytes = bump_attempt(&flight.bytes)?;
        state.ready.push_back(bytes);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn invocation(task: &str) -> TaskInvocation {
        TaskInvocation::new(task, vec![json!(1)], Map::new())
    }

    #[tokio::test]
    async fn acked_delivery_is_never_redelivered() {
        let broker = MemoryBroker::with_visibility_timeout(Duration::from_millis(10));
        broker.enqueue(&invocation("add")).await.unwrap();

        let delivery = broker
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        broker.ack(&delivery).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(broker
            .dequeue(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn nack_redelivers_with_incremented_attempt() {
        let broker = MemoryBroker::new();
        broker.enqueue(&invocation("add")).await.unwrap();

        let first = broker
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.invocation.attempt, 0);
        broker.nack(&first).await.unwrap();

        let second = broker
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.invocation.id, first.invocation.id);
        assert_eq!(second.invocation.attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_delivery_is_reclaimed_after_visibility_timeout() {
        let broker = MemoryBroker::with_visibility_timeout(Duration::from_secs(5));
        broker.enqueue(&invocation("add")).await.unwrap();

        // Simulated crash: dequeue and never ack.
        let lost = broker
            .dequeue(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        let lost_id = lost.invocation.id;
        drop(lost);

        // Within the window nothing is redeliverable.
        assert!(broker.dequeue(Duration::from_secs(1)).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(5)).await;
        let redelivered = broker
            .dequeue(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(redelivered.invocation.id, lost_id);
        assert_eq!(redelivered.invocation.attempt, 1);
    }

    #[tokio::test]
    async fn late_ack_after_reclaim_is_reported() {
        let broker = MemoryBroker::with_visibility_timeout(Duration::from_millis(5));
        broker.enqueue(&invocation("add")).await.unwrap();

        let stale = broker
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Reclaim happens on the next dequeue.
        let fresh = broker
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            broker.ack(&stale).await.unwrap_err(),
            BrokerError::UnknownDelivery(_)
        ));
        broker.ack(&fresh).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn eta_holds_back_delivery_until_due() {
        let broker = MemoryBroker::new();
        let delayed =
            invocation("cleanup").with_eta(chrono::Utc::now() + chrono::Duration::seconds(30));
        broker.enqueue(&delayed).await.unwrap();

        assert!(broker.dequeue(Duration::from_secs(1)).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(30)).await;
        let ready = broker
            .dequeue(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ready.invocation.id, delayed.id);
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_times_out_on_an_empty_queue() {
        let broker = MemoryBroker::new();
        let got = broker.dequeue(Duration::from_secs(3)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn closed_broker_surfaces_unavailable() {
        let broker = MemoryBroker::new();
        broker.close();

        let err = broker.enqueue(&invocation("add")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            broker.dequeue(Duration::from_millis(10)).await.unwrap_err(),
            BrokerError::Unavailable
        ));

        broker.reopen();
        broker.enqueue(&invocation("add")).await.unwrap();
    }

    #[tokio::test]
    async fn two_consumers_never_share_a_delivery() {
        let broker = std::sync::Arc::new(MemoryBroker::new());
        for _ in 0..8 {
            broker.enqueue(&invocation("add")).await.unwrap();
        }

        let a = {
            let broker = broker.clone();
            tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(d) = broker.dequeue(Duration::from_millis(50)).await.unwrap() {
                    broker.ack(&d).await.unwrap();
                    ids.push(d.invocation.id);
                }
                ids
            })
        };
        let b = {
            let broker = broker.clone();
            tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(d) = broker.dequeue(Duration::from_millis(50)).await.unwrap() {
                    broker.ack(&d).await.unwrap();
                    ids.push(d.invocation.id);
                }
                ids
            })
        };

        let (mut ids, more) = (a.await.unwrap(), b.await.unwrap());
        ids.extend(more);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
    }
}

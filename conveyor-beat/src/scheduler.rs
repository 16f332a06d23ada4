//! The beat loop.

use std::sync::Arc;
use std::time::Duration;

use conveyor_broker::Broker;
use conveyor_proto::TaskInvocation;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entry::ScheduleEntry;
use crate::lock::SchedulerLock;

#[derive(Debug, Error)]
pub enum BeatError {
    #[error("invalid beat configuration: {0}")]
    InvalidConfig(String),

    #[error("another scheduler instance holds the lock")]
    LockHeld,
}

#[derive(Debug, Clone)]
pub struct BeatConfig {
    /// Tick granularity. Must be positive and no larger than the smallest
    /// configured interval, or windows would be missed.
    pub tick: Duration,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
        }
    }
}

struct EntryState {
    entry: ScheduleEntry,
    next_fire: Instant,
}

/// Periodic scheduler bound to one broker.
pub struct BeatScheduler {
    config: BeatConfig,
    entries: Vec<EntryState>,
    broker: Arc<dyn Broker>,
    lock: Option<Arc<dyn SchedulerLock>>,
}

impl std::fmt::Debug for BeatScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeatScheduler")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl BeatScheduler {
    pub fn new(
        config: BeatConfig,
        entries: Vec<ScheduleEntry>,
        broker: Arc<dyn Broker>,
    ) -> Result<Self, BeatError> {
        if config.tick.is_zero() {
            return Err(BeatError::InvalidConfig("tick must be positive".into()));
        }
        for entry in &entries {
            if entry.interval.is_zero() {
                return Err(BeatError::InvalidConfig(format!(
                    "schedule {:?} has a zero interval",
                    entry.name
                )));
            }
            if entry.interval < config.tick {
                return Err(BeatError::InvalidConfig(format!(
                    "schedule {:?} interval {:?} is finer than the tick {:?}",
                    entry.name, entry.interval, config.tick
                )));
            }
        }

        let start = Instant::now();
        let entries = entries
            .into_iter()
            .map(|entry| EntryState {
                next_fire: start + entry.interval,
                entry,
            })
            .collect();

        Ok(Self {
            config,
            entries,
            broker,
            lock: None,
        })
    }

    /// Guard the loop with a scheduler lock; `run` fails with
    /// [`BeatError::LockHeld`] if another instance is active.
    #[must_use]
    pub fn with_lock(mut self, lock: Arc<dyn SchedulerLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Run the beat loop until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), BeatError> {
        if let Some(lock) = &self.lock {
            if !lock.try_acquire() {
                return Err(BeatError::LockHeld);
            }
        }

        info!(
            entries = self.entries.len(),
            tick_ms = self.config.tick.as_millis() as u64,
            "beat scheduler starting"
        );

        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        if let Some(lock) = &self.lock {
            lock.release();
        }
        info!("beat scheduler stopped");
        Ok(())
    }

    async fn tick(&mut self) {
        let now = Instant::now();
        for state in &mut self.entries {
            if now < state.next_fire {
                continue;
            }

            let invocation = TaskInvocation::new(
                state.entry.task.clone(),
                state.entry.args.clone(),
                state.entry.kwargs.clone(),
            );

            match self.broker.enqueue(&invocation).await {
                Ok(()) => {
                    debug!(
                        schedule = %state.entry.name,
                        task = %state.entry.task,
                        id = %invocation.id,
                        "fired"
                    );
                    // Absolute accounting: advance by whole intervals. A
                    // late tick skips missed windows instead of bursting.
                    let mut skipped = 0u32;
                    state.next_fire += state.entry.interval;
                    while state.next_fire <= now {
                        state.next_fire += state.entry.interval;
                        skipped += 1;
                    }
                    if skipped > 0 {
                        warn!(
                            schedule = %state.entry.name,
                            skipped,
                            "scheduler fell behind, skipping missed windows"
                        );
                    }
                }
                // One failed tick must not stop the loop; next_fire stays
                // put so the window is retried on the next tick.
                Err(e) => warn!(
                    schedule = %state.entry.name,
                    task = %state.entry.task,
                    error = %e,
                    "enqueue failed, will retry next tick"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LocalSchedulerLock;
    use conveyor_broker::MemoryBroker;

    async fn settle() {
        // Let the beat task observe the new time before the next advance.
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    async fn drain_by_task(broker: &MemoryBroker) -> Vec<String> {
        let mut tasks = Vec::new();
        while let Some(delivery) = broker.dequeue(Duration::from_millis(1)).await.unwrap() {
            broker.ack(&delivery).await.unwrap();
            tasks.push(delivery.invocation.task);
        }
        tasks
    }

    #[test]
    fn tick_finer_than_every_interval_is_required() {
        let broker = Arc::new(MemoryBroker::new());
        let err = BeatScheduler::new(
            BeatConfig {
                tick: Duration::from_secs(10),
            },
            vec![ScheduleEntry::new("fast", "health_check", Duration::from_secs(5))],
            broker,
        )
        .unwrap_err();
        assert!(matches!(err, BeatError::InvalidConfig(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn boundary_inclusive_firing_counts_over_65_seconds() {
        let broker = Arc::new(MemoryBroker::new());
        let beat = BeatScheduler::new(
            BeatConfig::default(),
            vec![
                ScheduleEntry::new("health", "health_check", Duration::from_secs(10)),
                ScheduleEntry::new("cleanup", "cleanup", Duration::from_secs(60)),
            ],
            broker.clone(),
        )
        .unwrap();

        let shutdown = CancellationToken::new();
        let run = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { beat.run(shutdown).await })
        };
        settle().await;

        for _ in 0..65 {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }

        shutdown.cancel();
        run.await.unwrap().unwrap();

        let tasks = drain_by_task(&broker).await;
        let health = tasks.iter().filter(|t| *t == "health_check").count();
        let cleanup = tasks.iter().filter(|t| *t == "cleanup").count();
        assert_eq!(health, 6, "10s entry fires at 10..=60");
        assert_eq!(cleanup, 1, "60s entry fires once at 60");
    }

    #[tokio::test(start_paused = true)]
    async fn a_stalled_scheduler_does_not_burst_missed_windows() {
        let broker = Arc::new(MemoryBroker::new());
        let beat = BeatScheduler::new(
            BeatConfig::default(),
            vec![ScheduleEntry::new("health", "health_check", Duration::from_secs(10))],
            broker.clone(),
        )
        .unwrap();

        let shutdown = CancellationToken::new();
        let run = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { beat.run(shutdown).await })
        };
        settle().await;

        // The clock leaps 35 seconds in one step, as if the process stalled.
        tokio::time::advance(Duration::from_secs(35)).await;
        settle().await;

        shutdown.cancel();
        run.await.unwrap().unwrap();

        let fired = drain_by_task(&broker).await.len();
        assert_eq!(fired, 1, "one firing per elapsed stall, not one per window");
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_failure_does_not_stop_future_ticks() {
        let broker = Arc::new(MemoryBroker::new());
        let beat = BeatScheduler::new(
            BeatConfig::default(),
            vec![ScheduleEntry::new("health", "health_check", Duration::from_secs(5))],
            broker.clone(),
        )
        .unwrap();

        let shutdown = CancellationToken::new();
        let run = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { beat.run(shutdown).await })
        };
        settle().await;

        broker.close();
        for _ in 0..7 {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }
        broker.reopen();
        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }

        shutdown.cancel();
        run.await.unwrap().unwrap();

        assert!(
            !drain_by_task(&broker).await.is_empty(),
            "scheduler recovered after the broker came back"
        );
    }

    #[tokio::test]
    async fn second_scheduler_is_rejected_by_the_lock() {
        let broker = Arc::new(MemoryBroker::new());
        let lock = Arc::new(LocalSchedulerLock::new());
        let entries =
            vec![ScheduleEntry::new("health", "health_check", Duration::from_secs(10))];

        let first = BeatScheduler::new(BeatConfig::default(), entries.clone(), broker.clone())
            .unwrap()
            .with_lock(lock.clone());
        let shutdown = CancellationToken::new();
        let run = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { first.run(shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = BeatScheduler::new(BeatConfig::default(), entries, broker)
            .unwrap()
            .with_lock(lock.clone());
        let err = second.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, BeatError::LockHeld));

        shutdown.cancel();
        run.await.unwrap().unwrap();
        assert!(lock.try_acquire(), "lock released on shutdown");
    }
}

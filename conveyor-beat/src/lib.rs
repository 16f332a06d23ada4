//! Beat: periodic injection of recurring task invocations.
//!
//! One logical clock loop walks a table of schedule entries on a fixed tick
//! and enqueues a fresh invocation for every entry whose window has elapsed,
//! exactly as if a client had submitted it. Scheduling uses absolute
//! next-fire accounting (`next_fire += interval`), so repeated intervals stay
//! aligned over long runs instead of accumulating sleep drift, and a late
//! tick skips missed windows rather than burst-firing them.
//!
//! Exactly one beat instance must be running per deployment; two fire
//! duplicates. The [`SchedulerLock`] seam is the recommended guard - wire a
//! shared lock in deployments where more than one process could start a
//! beat. Schedule state is in-process only: after a restart every entry
//! restarts its interval window, so entries may fire more often than their
//! interval across restarts (at-least-once per restart).

mod entry;
mod lock;
mod scheduler;

pub use entry::ScheduleEntry;
pub use lock::{LocalSchedulerLock, SchedulerLock};
pub use scheduler::{BeatConfig, BeatError, BeatScheduler};

//! Single-active-scheduler guard.

use std::sync::atomic::{AtomicBool, Ordering};

/// Mutual exclusion between beat instances.
///
/// Running two beats is a misconfiguration (duplicate firings); deployments
/// that cannot rule it out should back this trait with a shared lock
/// service. The in-process implementation below covers the single-binary
/// case and the tests.
pub trait SchedulerLock: Send + Sync {
    /// Attempt to become the active scheduler. Non-blocking.
    fn try_acquire(&self) -> bool;

    fn release(&self);
}

/// Process-local lock: guards against two beats inside one process.
#[derive(Debug, Default)]
pub struct LocalSchedulerLock {
    held: AtomicBool,
}

impl LocalSchedulerLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchedulerLock for LocalSchedulerLock {
    fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let lock = LocalSchedulerLock::new();
        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());
        lock.release();
        assert!(lock.try_acquire());
    }
}

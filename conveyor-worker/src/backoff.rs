//! Bounded exponential backoff for transient broker failures.

use std::time::Duration;

use crate::config::BackoffConfig;

pub(crate) struct Backoff {
    config: BackoffConfig,
    current: Option<Duration>,
}

impl Backoff {
    pub(crate) fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    /// Next delay to wait: initial, then doubling, capped at max.
    pub(crate) fn next(&mut self) -> Duration {
        let next = match self.current {
            None => self.config.initial,
            Some(d) => (d * 2).min(self.config.max),
        };
        self.current = Some(next);
        next
    }

    /// Call after a successful operation.
    pub(crate) fn reset(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_the_cap_and_resets() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(350),
        });
        assert_eq!(backoff.next(), Duration::from_millis(100));
        assert_eq!(backoff.next(), Duration::from_millis(200));
        assert_eq!(backoff.next(), Duration::from_millis(350));
        assert_eq!(backoff.next(), Duration::from_millis(350));

        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_millis(100));
    }
}

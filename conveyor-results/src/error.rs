//! Result store errors.

use thiserror::Error;

/// Errors that may occur while talking to the result store.
///
/// Result delivery is best-effort: workers log `Unavailable` and keep
/// running, since the task itself may already have executed.
#[derive(Debug, Error)]
pub enum ResultStoreError {
    /// The store cannot be reached right now. Transient.
    #[error("result store unavailable")]
    Unavailable,

    #[error("invalid result store url: {0}")]
    InvalidUrl(String),
}

impl ResultStoreError {
    #[inline]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

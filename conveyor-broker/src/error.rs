//! Broker error taxonomy.

use thiserror::Error;

/// Errors that may occur while talking to the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker cannot be reached right now. Transient: callers retry
    /// with backoff and must never drop an un-acked invocation over it.
    #[error("broker unavailable")]
    Unavailable,

    #[error("invalid broker url: {0}")]
    InvalidUrl(String),

    /// Ack or nack of a delivery the broker no longer tracks, typically
    /// because its visibility timeout already expired.
    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    #[error(transparent)]
    Proto(#[from] conveyor_proto::ProtoError),
}

impl BrokerError {
    /// Whether the operation may succeed if retried with backoff.
    #[inline]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

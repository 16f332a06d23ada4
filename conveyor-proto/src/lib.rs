//! Wire types shared by every conveyor process.
//!
//! Producers, workers and the beat scheduler may run different builds, so
//! everything that crosses the broker or the result store lives here behind
//! a versioned envelope.
//!
//! # Contents
//!
//! - [`TaskInvocation`] - one concrete request to run a named task
//! - [`TaskStatus`] / [`TaskResult`] - what clients observe per invocation
//! - [`RetryPolicy`] / [`TimeLimits`] - per-task execution policy
//! - [`encode_invocation`] / [`decode_invocation`] - the envelope codec

mod envelope;
mod invocation;
mod policy;
mod result;

pub use envelope::{decode_invocation, encode_invocation, ProtoError, SCHEMA_VERSION};
pub use invocation::TaskInvocation;
pub use policy::{RetryPolicy, TimeLimits};
pub use result::{ErrorInfo, ErrorKind, TaskResult, TaskStatus};

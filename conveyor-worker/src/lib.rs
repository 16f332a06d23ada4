//! Worker engine.
//!
//! A pool of N slots pulls invocations off the broker and executes them.
//! Each slot cycles IDLE -> EXECUTING -> terminal write -> IDLE, processes at
//! most one invocation at a time, and shares nothing mutable with its peers
//! beyond the broker and result store handles.
//!
//! Failure handling per invocation: an unknown task name fails immediately
//! (never retried); a handler error or hard-time-limit teardown is retried
//! via nack until the retry budget is exhausted, then recorded as terminal
//! FAILURE. Failures inside one invocation never affect other slots, and a
//! result-store outage downgrades result delivery to a logged best effort
//! rather than crashing the slot.

mod backoff;
mod config;
mod engine;
mod slot;

pub use config::{BackoffConfig, ShutdownPolicy, WorkerConfig};
pub use engine::WorkerEngine;

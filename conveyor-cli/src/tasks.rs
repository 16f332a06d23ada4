//! Demonstration task implementations.
//!
//! These are the example task bodies the queue ships with: small,
//! self-contained handlers that show argument handling, progress events and
//! periodic scheduling. Real deployments register their own handlers the
//! same way.

use std::time::Duration;

use chrono::Utc;
use conveyor_beat::ScheduleEntry;
use conveyor_registry::{
    async_trait, RegistryBuilder, RegistryError, TaskContext, TaskError, TaskHandler,
};
use serde_json::{json, Map, Value};

/// Task name constants for type-safe references.
pub mod task_names {
    pub const ADD_NUMBERS: &str = "add_numbers";
    pub const SAY_HELLO: &str = "say_hello";
    pub const LONG_RUNNING: &str = "long_running";
    pub const HEALTH_CHECK: &str = "health_check";
    pub const CLEANUP: &str = "cleanup";
}

/// Register every demonstration task.
pub fn register_demo_tasks(builder: RegistryBuilder) -> Result<RegistryBuilder, RegistryError> {
    builder
        .register(AddNumbers)?
        .register(SayHello)?
        .register(LongRunning)?
        .register(HealthCheck)?
        .register(Cleanup)
}

/// Default periodic schedule: a health check every 10 seconds and a cleanup
/// pass every 60 seconds (shortened from daily for demonstration purposes).
pub fn default_schedule() -> Vec<ScheduleEntry> {
    vec![
        ScheduleEntry::new("health-check-every-10s", task_names::HEALTH_CHECK, Duration::from_secs(10)),
        ScheduleEntry::new("cleanup-every-60s", task_names::CLEANUP, Duration::from_secs(60)),
    ]
}

/// Adds two integers.
pub struct AddNumbers;

#[async_trait]
impl TaskHandler for AddNumbers {
    fn name(&self) -> &str {
        task_names::ADD_NUMBERS
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let x = args
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| TaskError::invalid_args("expected integer x as first argument"))?;
        let y = args
            .get(1)
            .and_then(Value::as_i64)
            .ok_or_else(|| TaskError::invalid_args("expected integer y as second argument"))?;

        ctx.progress(format!("calculating {x} + {y}"));
        let sum = x
            .checked_add(y)
            .ok_or_else(|| TaskError::failed("integer overflow"))?;
        ctx.event("calculation complete", json!({ "sum": sum }));
        Ok(json!(sum))
    }
}

/// Builds a greeting for a name given positionally or as `name`.
pub struct SayHello;

#[async_trait]
impl TaskHandler for SayHello {
    fn name(&self) -> &str {
        task_names::SAY_HELLO
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let name = args
            .first()
            .and_then(Value::as_str)
            .or_else(|| kwargs.get("name").and_then(Value::as_str))
            .ok_or_else(|| TaskError::invalid_args("expected a name"))?;

        ctx.progress(format!("preparing greeting for {name}"));
        Ok(json!(format!("Hello, {name}!")))
    }
}

/// Sleeps for a configurable number of seconds, reporting progress each
/// second. Demonstrates long-running work under the worker's time limits.
pub struct LongRunning;

#[async_trait]
impl TaskHandler for LongRunning {
    fn name(&self) -> &str {
        task_names::LONG_RUNNING
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let duration = args
            .first()
            .or_else(|| kwargs.get("duration"))
            .and_then(Value::as_u64)
            .unwrap_or(10);

        for elapsed in 1..=duration {
            tokio::time::sleep(Duration::from_secs(1)).await;
            ctx.event("progress", json!({ "elapsed": elapsed, "total": duration }));
        }
        Ok(json!(format!("completed after {duration} seconds")))
    }
}

/// Periodic system health snapshot.
pub struct HealthCheck;

#[async_trait]
impl TaskHandler for HealthCheck {
    fn name(&self) -> &str {
        task_names::HEALTH_CHECK
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        _args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let now = Utc::now();
        // Synthetic metrics for the demonstration; a real deployment would
        // sample the host here.
        let millis = u64::from(now.timestamp_subsec_millis());
        let cpu_usage = 10 + millis % 81;
        let memory_usage = 20 + (millis / 7) % 61;
        let status = if cpu_usage < 80 && memory_usage < 75 {
            "healthy"
        } else {
            "warning"
        };

        ctx.event(
            "health sampled",
            json!({ "cpu_usage": cpu_usage, "memory_usage": memory_usage, "status": status }),
        );
        Ok(json!({
            "timestamp": now.to_rfc3339(),
            "cpu_usage": cpu_usage,
            "memory_usage": memory_usage,
            "status": status,
        }))
    }
}

/// Periodic cleanup pass.
pub struct Cleanup;

#[async_trait]
impl TaskHandler for Cleanup {
    fn name(&self) -> &str {
        task_names::CLEANUP
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        _args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let now = Utc::now();
        let millis = u64::from(now.timestamp_subsec_millis());
        let files_cleaned = 5 + millis % 46;
        let cache_cleared_mb = 100 + (millis / 3) % 901;

        ctx.event(
            "cleanup finished",
            json!({ "files_cleaned": files_cleaned, "cache_cleared_mb": cache_cleared_mb }),
        );
        Ok(json!({
            "timestamp": now.to_rfc3339(),
            "files_cleaned": files_cleaned,
            "cache_cleared_mb": cache_cleared_mb,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use conveyor_registry::MemoryEventSink;
    use uuid::Uuid;

    fn ctx(sink: Arc<MemoryEventSink>) -> TaskContext {
        TaskContext::with_sink(Uuid::new_v4(), "test", 0, sink)
    }

    #[tokio::test]
    async fn add_numbers_sums_its_arguments() {
        let sink = Arc::new(MemoryEventSink::new());
        let out = AddNumbers
            .run(&ctx(sink.clone()), vec![json!(15), json!(27)], Map::new())
            .await
            .unwrap();
        assert_eq!(out, json!(42));
        assert!(!sink.events().is_empty());
    }

    #[tokio::test]
    async fn add_numbers_rejects_non_integers() {
        let sink = Arc::new(MemoryEventSink::new());
        let err = AddNumbers
            .run(&ctx(sink), vec![json!("nope")], Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn say_hello_accepts_positional_or_keyword_name() {
        let sink = Arc::new(MemoryEventSink::new());
        let out = SayHello
            .run(&ctx(sink.clone()), vec![json!("World")], Map::new())
            .await
            .unwrap();
        assert_eq!(out, json!("Hello, World!"));

        let mut kwargs = Map::new();
        kwargs.insert("name".into(), json!("Conveyor"));
        let out = SayHello
            .run(&ctx(sink), vec![], kwargs)
            .await
            .unwrap();
        assert_eq!(out, json!("Hello, Conveyor!"));
    }

    #[test]
    fn demo_registration_is_idempotent() {
        let builder = register_demo_tasks(RegistryBuilder::new()).unwrap();
        let registry = register_demo_tasks(builder).unwrap().build();
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn default_schedule_targets_registered_tasks() {
        let registry = register_demo_tasks(RegistryBuilder::new()).unwrap().build();
        for entry in default_schedule() {
            assert!(registry.lookup(&entry.task).is_ok(), "{} unregistered", entry.task);
        }
    }
}

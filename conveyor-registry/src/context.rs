//! Execution context handed to running handlers.
//!
//! Handlers report progress through an [`EventSink`] instead of writing to
//! the console, so output is testable and redirectable. The default sink
//! forwards to `tracing`; tests use [`MemoryEventSink`] to capture events.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::info;
use uuid::Uuid;

/// One structured event emitted from inside a task body.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub invocation_id: Uuid,
    pub task: String,
    pub attempt: u32,
    pub message: String,
    pub fields: Option<Value>,
}

/// Destination for handler-emitted events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TaskEvent);
}

/// Default sink: forward events to the process-wide tracing subscriber.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: TaskEvent) {
        match &event.fields {
            Some(fields) => info!(
                target: "conveyor::task",
                id = %event.invocation_id,
                task = %event.task,
                attempt = event.attempt,
                fields = %fields,
                "{}",
                event.message
            ),
            None => info!(
                target: "conveyor::task",
                id = %event.invocation_id,
                task = %event.task,
                attempt = event.attempt,
                "{}",
                event.message
            ),
        }
    }
}

/// Capturing sink for tests.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<TaskEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: TaskEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Per-invocation execution context.
///
/// Identifies the running invocation and carries the event sink. One context
/// is built per delivery; handlers only ever borrow it.
#[derive(Clone)]
pub struct TaskContext {
    pub invocation_id: Uuid,
    pub task: String,
    pub attempt: u32,
    sink: Arc<dyn EventSink>,
}

impl TaskContext {
    pub fn new(invocation_id: Uuid, task: impl Into<String>, attempt: u32) -> Self {
        Self::with_sink(invocation_id, task, attempt, Arc::new(TracingEventSink))
    }

    pub fn with_sink(
        invocation_id: Uuid,
        task: impl Into<String>,
        attempt: u32,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            invocation_id,
            task: task.into(),
            attempt,
            sink,
        }
    }

    /// Emit a plain progress message.
    pub fn progress(&self, message: impl Into<String>) {
        self.emit(message, None);
    }

    /// Emit a progress message with structured fields.
    pub fn event(&self, message: impl Into<String>, fields: Value) {
        self.emit(message, Some(fields));
    }

    fn emit(&self, message: impl Into<String>, fields: Option<Value>) {
        self.sink.emit(TaskEvent {
            invocation_id: self.invocation_id,
            task: self.task.clone(),
            attempt: self.attempt,
            message: message.into(),
            fields,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_reach_the_sink_with_invocation_identity() {
        let sink = Arc::new(MemoryEventSink::new());
        let id = Uuid::new_v4();
        let ctx = TaskContext::with_sink(id, "cleanup", 2, sink.clone());

        ctx.progress("scanning");
        ctx.event("done", json!({"files_cleaned": 12}));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].invocation_id, id);
        assert_eq!(events[0].attempt, 2);
        assert_eq!(events[1].fields, Some(json!({"files_cleaned": 12})));
    }
}

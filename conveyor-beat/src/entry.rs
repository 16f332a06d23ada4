//! Periodic schedule entries.

use std::time::Duration;

use serde_json::{Map, Value};

/// One recurring task definition: fire `task` with these arguments every
/// `interval`, starting one full interval after the scheduler starts.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    /// Schedule name, for logs and diagnostics; distinct from the task name
    /// so two schedules can target the same task.
    pub name: String,
    pub task: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub interval: Duration,
}

impl ScheduleEntry {
    pub fn new(name: impl Into<String>, task: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            task: task.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            interval,
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }
}

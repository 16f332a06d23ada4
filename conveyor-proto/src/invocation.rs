//! Task invocation record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One concrete request to run a named task with specific arguments.
///
/// The id is assigned at creation and never reused; the broker may deliver
/// the same invocation more than once (at-least-once), in which case
/// `attempt` reflects the delivery count starting at zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskInvocation {
    pub id: Uuid,
    pub task: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attempt: u32,
    /// Earliest execution time. `None` means "as soon as possible".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,
}

impl TaskInvocation {
    /// Create a fresh invocation with a new random id and attempt zero.
    pub fn new(task: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: task.into(),
            args,
            kwargs,
            created_at: Utc::now(),
            attempt: 0,
            eta: None,
        }
    }

    /// Set an earliest execution time.
    #[must_use]
    pub fn with_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fresh_invocations_get_unique_ids() {
        let a = TaskInvocation::new("add", vec![json!(1)], Map::new());
        let b = TaskInvocation::new("add", vec![json!(1)], Map::new());
        assert_ne!(a.id, b.id);
        assert_eq!(a.attempt, 0);
        assert!(a.eta.is_none());
    }
}

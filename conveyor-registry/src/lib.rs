//! Task registry: name -> handler and metadata.
//!
//! Built once during process initialisation via [`RegistryBuilder`], then
//! frozen into an immutable [`Registry`] shared by every worker slot. There
//! is no runtime re-registration.
//!
//! # Example
//!
//! ```rust,no_run
//! use conveyor_registry::{async_trait, RegistryBuilder, TaskContext, TaskError, TaskHandler};
//! use serde_json::{json, Map, Value};
//!
//! struct Add;
//!
//! #[async_trait]
//! impl TaskHandler for Add {
//!     fn name(&self) -> &str {
//!         "add"
//!     }
//!
//!     async fn run(
//!         &self,
//!         ctx: &TaskContext,
//!         args: Vec<Value>,
//!         _kwargs: Map<String, Value>,
//!     ) -> Result<Value, TaskError> {
//!         let (x, y) = (args[0].as_i64().unwrap(), args[1].as_i64().unwrap());
//!         ctx.progress("adding");
//!         Ok(json!(x + y))
//!     }
//! }
//!
//! let registry = RegistryBuilder::new().register(Add).unwrap().build();
//! assert!(registry.lookup("add").is_ok());
//! ```

mod context;
mod handler;
mod registry;

pub use context::{EventSink, MemoryEventSink, TaskContext, TaskEvent, TracingEventSink};
pub use handler::{TaskError, TaskHandler};
pub use registry::{Registry, RegistryBuilder, RegistryError};

// Re-export for convenience when implementing TaskHandler.
pub use async_trait::async_trait;

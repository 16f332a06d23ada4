//! Name -> handler map with idempotent registration.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::handler::TaskHandler;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two different handler types claimed the same task name. This is a
    /// startup-time configuration error and aborts initialisation.
    #[error("task name {0:?} registered with conflicting handlers")]
    NameCollision(String),

    #[error("no task registered under name {0:?}")]
    NotFound(String),
}

struct Registration {
    handler: Arc<dyn TaskHandler>,
    // Identifies the concrete handler type, so re-registering the same
    // handler is a no-op while a different one under the same name is fatal.
    type_id: TypeId,
}

/// Builder for the process-wide registry.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<String, Registration>,
}

impl std::fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own name.
    ///
    /// Registering the same handler type twice is idempotent; a different
    /// type under an already-taken name is [`RegistryError::NameCollision`].
    pub fn register<H: TaskHandler>(mut self, handler: H) -> Result<Self, RegistryError> {
        let name = handler.name().to_owned();
        let type_id = TypeId::of::<H>();

        match self.entries.get(&name) {
            Some(existing) if existing.type_id == type_id => {
                debug!(task = %name, "repeat registration ignored");
            }
            Some(_) => return Err(RegistryError::NameCollision(name)),
            None => {
                self.entries.insert(
                    name,
                    Registration {
                        handler: Arc::new(handler),
                        type_id,
                    },
                );
            }
        }
        Ok(self)
    }

    /// Freeze into an immutable registry.
    pub fn build(self) -> Registry {
        Registry {
            entries: Arc::new(
                self.entries
                    .into_iter()
                    .map(|(name, reg)| (name, reg.handler))
                    .collect(),
            ),
        }
    }
}

/// Immutable name -> handler map, cheap to clone across worker slots.
#[derive(Clone)]
pub struct Registry {
    entries: Arc<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl Registry {
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn TaskHandler>, RegistryError> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))
    }

    /// Registered task names, for diagnostics and CLI listings.
    pub fn task_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

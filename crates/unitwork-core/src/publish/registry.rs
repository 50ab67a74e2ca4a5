//! Ordered listener registry.

use std::sync::Arc;

use super::listener::ChangeListener;
use crate::error::RegistryError;

/// The listeners a publisher notifies, in registration order.
///
/// Built once at startup and then shared read-only.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    listeners: Vec<Arc<dyn ChangeListener>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener after the ones already registered.
    pub fn register(mut self, listener: Arc<dyn ChangeListener>) -> Result<Self, RegistryError> {
        if self.listeners.iter().any(|l| l.name() == listener.name()) {
            return Err(RegistryError::DuplicateListener(listener.name().to_string()));
        }
        self.listeners.push(listener);
        Ok(self)
    }

    /// Iterate listeners in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ChangeListener>> {
        self.listeners.iter()
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Listener names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.listeners.iter().map(|l| l.name()).collect()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.names())
            .finish()
    }
}

//! Inbound lifecycle events.

use thiserror::Error;
use unitwork_proto::{EntityRef, Value};

use crate::error::CollectError;

/// A property value that the producer could not read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ReadFault {
    /// Producer-supplied reason.
    pub reason: String,
}

impl ReadFault {
    /// Create a read fault.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A property value as observed by the producer.
pub type Observed = Result<Value, ReadFault>;

/// One lifecycle event reported by the persistence layer.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityEvent {
    /// A new entity was made persistent.
    Created(EntityRef),
    /// A property of an entity was assigned.
    PropertySet {
        /// Entity whose property changed.
        entity: EntityRef,
        /// Property name.
        property: String,
        /// Value before the write.
        old: Observed,
        /// Value after the write.
        new: Observed,
    },
    /// An entity was removed.
    Deleted(EntityRef),
}

impl EntityEvent {
    /// Convenience constructor for a readable property write.
    pub fn set(
        entity: EntityRef,
        property: impl Into<String>,
        old: impl Into<Value>,
        new: impl Into<Value>,
    ) -> Self {
        EntityEvent::PropertySet {
            entity,
            property: property.into(),
            old: Ok(old.into()),
            new: Ok(new.into()),
        }
    }

    /// Entity the event is about.
    pub fn entity(&self) -> &EntityRef {
        match self {
            EntityEvent::Created(entity) | EntityEvent::Deleted(entity) => entity,
            EntityEvent::PropertySet { entity, .. } => entity,
        }
    }
}

/// Observer interface through which the persistence layer reports changes.
///
/// The persistence layer is the sole producer; each transaction owns one
/// observer, so implementations need no synchronisation.
pub trait EntityObserver {
    /// A new entity was made persistent.
    fn on_created(&mut self, entity: EntityRef) -> Result<(), CollectError>;

    /// A property was assigned.
    fn on_property_set(
        &mut self,
        entity: EntityRef,
        property: String,
        old: Observed,
        new: Observed,
    ) -> Result<(), CollectError>;

    /// An entity was removed.
    fn on_deleted(&mut self, entity: EntityRef) -> Result<(), CollectError>;

    /// Dispatch an event to the matching callback.
    fn observe(&mut self, event: EntityEvent) -> Result<(), CollectError> {
        match event {
            EntityEvent::Created(entity) => self.on_created(entity),
            EntityEvent::PropertySet {
                entity,
                property,
                old,
                new,
            } => self.on_property_set(entity, property, old, new),
            EntityEvent::Deleted(entity) => self.on_deleted(entity),
        }
    }
}

//! Entity references and per-entity change records.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::Value;

/// Persistence-layer object identifier.
pub type EntityId = [u8; 16];

/// Reference to a persisted domain object.
///
/// Identity within a transaction is the pair of entity type and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    /// Domain type of the entity (e.g. `Customer`).
    pub entity_type: String,
    /// Object identifier assigned by the persistence layer.
    pub entity_id: EntityId,
}

impl EntityRef {
    /// Create a new entity reference.
    pub fn new(entity_type: impl Into<String>, entity_id: EntityId) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
        }
    }

    /// Hex form of the entity id.
    pub fn id_hex(&self) -> String {
        hex::encode(self.entity_id)
    }

    /// Parse the `Type#<hex id>` form produced by `Display`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let (entity_type, id_hex) = s
            .split_once('#')
            .ok_or_else(|| Error::InvalidEntityRef(s.to_string()))?;
        if entity_type.is_empty() {
            return Err(Error::InvalidEntityRef(s.to_string()));
        }

        let bytes = hex::decode(id_hex).map_err(|_| Error::InvalidEntityRef(s.to_string()))?;
        let entity_id: EntityId = bytes
            .try_into()
            .map_err(|_| Error::InvalidEntityRef(s.to_string()))?;

        Ok(Self::new(entity_type, entity_id))
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id_hex())
    }
}

/// Net lifecycle state of an entity within one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// The entity did not exist before the transaction.
    Created,
    /// The entity existed before and after the transaction with changed properties.
    Updated,
    /// The entity existed before the transaction and was removed by it.
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Created => write!(f, "created"),
            ChangeKind::Updated => write!(f, "updated"),
            ChangeKind::Deleted => write!(f, "deleted"),
        }
    }
}

/// Net change of one property of an updated entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    /// Property name.
    pub property: String,
    /// Value before the transaction (first observed old value).
    pub old_value: Value,
    /// Value at the end of the transaction (last observed new value).
    pub new_value: Value,
}

impl PropertyChange {
    /// Create a new property change.
    pub fn new(property: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        Self {
            property: property.into(),
            old_value,
            new_value,
        }
    }
}

/// One entity record in a change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    /// The entity that changed.
    pub entity: EntityRef,
    /// Net lifecycle state.
    pub kind: ChangeKind,
    /// Property deltas; only populated for [`ChangeKind::Updated`].
    pub changes: Vec<PropertyChange>,
}

impl TrackedEntity {
    /// Record for an entity created in the transaction.
    pub fn created(entity: EntityRef) -> Self {
        Self {
            entity,
            kind: ChangeKind::Created,
            changes: Vec::new(),
        }
    }

    /// Record for an entity deleted in the transaction.
    pub fn deleted(entity: EntityRef) -> Self {
        Self {
            entity,
            kind: ChangeKind::Deleted,
            changes: Vec::new(),
        }
    }

    /// Record for an entity whose properties changed.
    pub fn updated(entity: EntityRef, changes: Vec<PropertyChange>) -> Self {
        Self {
            entity,
            kind: ChangeKind::Updated,
            changes,
        }
    }

    /// Find the change for a property, if any.
    pub fn change_for(&self, property: &str) -> Option<&PropertyChange> {
        self.changes.iter().find(|c| c.property == property)
    }

    /// Names of the changed properties.
    pub fn changed_properties(&self) -> Vec<String> {
        self.changes.iter().map(|c| c.property.clone()).collect()
    }
}

/// A property value that could not be read while collecting changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyFault {
    /// Entity owning the property.
    pub entity: EntityRef,
    /// Property that could not be read.
    pub property: String,
    /// Reason reported by the producer.
    pub reason: String,
}

/// Identity of one transaction.
///
/// An interaction (a single user request) may run several transactions one
/// after another; they share the interaction id and differ by sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId {
    /// Interaction the transaction belongs to.
    pub interaction: [u8; 16],
    /// Position of the transaction within its interaction, starting at 0.
    pub sequence: u32,
}

impl TransactionId {
    /// Create a transaction id.
    pub fn new(interaction: [u8; 16], sequence: u32) -> Self {
        Self {
            interaction,
            sequence,
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", hex::encode(self.interaction), self.sequence)
    }
}

//! The immutable per-transaction change set.

use serde::{Deserialize, Serialize};

use crate::change::{ChangeKind, EntityRef, PropertyFault, TrackedEntity, TransactionId};
use crate::error::Error;

/// Transaction metadata stamped onto a change set when it is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetHeader {
    /// Transaction that produced the changes.
    pub transaction_id: TransactionId,
    /// User on whose behalf the transaction ran.
    pub user: String,
    /// Build time in microseconds since Unix epoch.
    pub timestamp: u64,
}

impl ChangeSetHeader {
    /// Create a header.
    pub fn new(transaction_id: TransactionId, user: impl Into<String>, timestamp: u64) -> Self {
        Self {
            transaction_id,
            user: user.into(),
            timestamp,
        }
    }
}

/// Counters describing a change set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Entities created.
    pub created: usize,
    /// Entities updated.
    pub updated: usize,
    /// Entities deleted.
    pub deleted: usize,
    /// Property changes across all updated entities.
    pub properties_modified: usize,
}

/// All entities changed by one transaction, in order of first observation.
///
/// A change set holds at most one record per entity and cannot be modified
/// once built; listeners only ever see it by shared reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    header: ChangeSetHeader,
    entities: Vec<TrackedEntity>,
    faults: Vec<PropertyFault>,
}

impl ChangeSet {
    /// Build a change set.
    ///
    /// Callers are expected to hand in one record per entity; the collector
    /// guarantees this.
    pub fn new(
        header: ChangeSetHeader,
        entities: Vec<TrackedEntity>,
        faults: Vec<PropertyFault>,
    ) -> Self {
        debug_assert!(
            {
                let mut refs: Vec<&EntityRef> = entities.iter().map(|e| &e.entity).collect();
                refs.sort();
                refs.windows(2).all(|w| w[0] != w[1])
            },
            "duplicate entity in change set"
        );
        Self {
            header,
            entities,
            faults,
        }
    }

    /// Transaction metadata.
    pub fn header(&self) -> &ChangeSetHeader {
        &self.header
    }

    /// Transaction that produced the changes.
    pub fn transaction_id(&self) -> TransactionId {
        self.header.transaction_id
    }

    /// User on whose behalf the transaction ran.
    pub fn user(&self) -> &str {
        &self.header.user
    }

    /// Build time in microseconds since Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// Entity records in order of first observation.
    pub fn entities(&self) -> &[TrackedEntity] {
        &self.entities
    }

    /// Properties that could not be read while collecting.
    pub fn faults(&self) -> &[PropertyFault] {
        &self.faults
    }

    /// Look up the record for an entity.
    pub fn get(&self, entity: &EntityRef) -> Option<&TrackedEntity> {
        self.entities.iter().find(|e| &e.entity == entity)
    }

    /// Number of entity records.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entity changed.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Number of entities with the given net state.
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.entities.iter().filter(|e| e.kind == kind).count()
    }

    /// Total property changes across all records.
    pub fn property_change_count(&self) -> usize {
        self.entities.iter().map(|e| e.changes.len()).sum()
    }

    /// Entity types touched, in order of first appearance.
    pub fn entity_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = Vec::new();
        for tracked in &self.entities {
            let ty = tracked.entity.entity_type.as_str();
            if !types.contains(&ty) {
                types.push(ty);
            }
        }
        types
    }

    /// Counters for this change set.
    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            created: self.count(ChangeKind::Created),
            updated: self.count(ChangeKind::Updated),
            deleted: self.count(ChangeKind::Deleted),
            properties_modified: self.property_change_count(),
        }
    }

    /// Fail if any property value cannot be encoded faithfully.
    pub fn ensure_encodable(&self) -> Result<(), Error> {
        for tracked in &self.entities {
            for change in &tracked.changes {
                if !change.old_value.is_encodable() || !change.new_value.is_encodable() {
                    return Err(Error::Serialization(format!(
                        "{}.{}: non-finite float cannot be encoded",
                        tracked.entity, change.property
                    )));
                }
            }
        }
        Ok(())
    }

    /// Encode as JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, Error> {
        self.ensure_encodable()?;
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

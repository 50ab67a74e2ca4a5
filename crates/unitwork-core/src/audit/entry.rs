//! Audit rows.

use serde::{Deserialize, Serialize};
use unitwork_proto::{
    ChangeKind, ChangeSet, EntityRef, TransactionId, Value, DELETED_MARKER, NEW_MARKER,
};

use crate::storage::key::generate_id;

/// One row of the audit trail.
///
/// Updated entities produce one row per changed property. Created and
/// deleted entities produce a single row whose property is the `[NEW]` or
/// `[DELETED]` marker and whose values are null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique row id.
    pub id: [u8; 16],
    /// Transaction that made the change.
    pub transaction_id: TransactionId,
    /// User on whose behalf the change was made.
    pub user: String,
    /// Change set timestamp in microseconds since Unix epoch.
    pub timestamp: u64,
    /// Changed entity.
    pub entity: EntityRef,
    /// Property name, or a lifecycle marker.
    pub property: String,
    /// Value before the transaction.
    pub old_value: Value,
    /// Value after the transaction.
    pub new_value: Value,
}

impl AuditEntry {
    /// Expand a change set into audit rows, in change set order.
    pub fn from_change_set(changes: &ChangeSet) -> Vec<AuditEntry> {
        let row = |entity: &EntityRef, property: &str, old_value: Value, new_value: Value| {
            AuditEntry {
                id: generate_id(),
                transaction_id: changes.transaction_id(),
                user: changes.user().to_string(),
                timestamp: changes.timestamp(),
                entity: entity.clone(),
                property: property.to_string(),
                old_value,
                new_value,
            }
        };

        let mut rows = Vec::new();
        for tracked in changes.entities() {
            match tracked.kind {
                ChangeKind::Created => {
                    rows.push(row(&tracked.entity, NEW_MARKER, Value::Null, Value::Null))
                }
                ChangeKind::Deleted => {
                    rows.push(row(&tracked.entity, DELETED_MARKER, Value::Null, Value::Null))
                }
                ChangeKind::Updated => {
                    for change in &tracked.changes {
                        rows.push(row(
                            &tracked.entity,
                            &change.property,
                            change.old_value.clone(),
                            change.new_value.clone(),
                        ));
                    }
                }
            }
        }
        rows
    }

    /// Whether this row marks a created entity.
    pub fn is_new(&self) -> bool {
        self.property == NEW_MARKER
    }

    /// Whether this row marks a deleted entity.
    pub fn is_deleted(&self) -> bool {
        self.property == DELETED_MARKER
    }

    /// Format as a single log line.
    pub fn to_log_line(&self) -> String {
        let change = if self.is_new() || self.is_deleted() {
            self.property.clone()
        } else {
            format!("{}: {} -> {}", self.property, self.old_value, self.new_value)
        };
        format!(
            "{} id={} tx={} user={} entity={} {}",
            self.timestamp,
            hex::encode(self.id),
            self.transaction_id,
            self.user,
            self.entity,
            change
        )
    }
}

//! Audit trail listener.

use dashmap::DashMap;
use unitwork_proto::{ChangeSet, TransactionId};

use super::entry::AuditEntry;
use super::sink::AuditSink;
use crate::error::ListenerError;
use crate::publish::{ChangeListener, CommitScope};

/// Writes an audit row per change once the transaction commits.
///
/// Rows are staged per transaction at pre-commit and reach the sink only in
/// [`ChangeListener::on_commit`]; a rollback discards them.
#[derive(Debug)]
pub struct AuditListener<S: AuditSink> {
    sink: S,
    staged: DashMap<TransactionId, Vec<AuditEntry>>,
}

impl<S: AuditSink> AuditListener<S> {
    /// Create a listener writing to `sink`.
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            staged: DashMap::new(),
        }
    }

    /// The underlying sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Number of transactions with rows awaiting commit.
    pub fn pending_transactions(&self) -> usize {
        self.staged.len()
    }
}

impl<S: AuditSink> ChangeListener for AuditListener<S> {
    fn name(&self) -> &str {
        "audit"
    }

    fn on_changes(&self, changes: &ChangeSet, _scope: &mut CommitScope) -> Result<(), ListenerError> {
        let rows = AuditEntry::from_change_set(changes);
        tracing::debug!(transaction = %changes.transaction_id(), rows = rows.len(), "audit rows staged");
        self.staged.insert(changes.transaction_id(), rows);
        Ok(())
    }

    fn on_commit(&self, transaction_id: &TransactionId) {
        if let Some((_, rows)) = self.staged.remove(transaction_id) {
            for row in rows {
                self.sink.write(row);
            }
        }
    }

    fn on_rollback(&self, transaction_id: &TransactionId) {
        self.staged.remove(transaction_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use unitwork_proto::{ChangeSetHeader, EntityRef, TrackedEntity};

    fn changes(sequence: u32) -> ChangeSet {
        ChangeSet::new(
            ChangeSetHeader::new(TransactionId::new([1; 16], sequence), "ann", 5),
            vec![TrackedEntity::created(EntityRef::new("Customer", [sequence as u8; 16]))],
            vec![],
        )
    }

    #[test]
    fn test_rows_written_on_commit_only() {
        let sink = MemoryAuditSink::new();
        let listener = AuditListener::new(sink.clone());
        let set = changes(0);

        listener.on_changes(&set, &mut CommitScope::new()).unwrap();
        assert!(sink.is_empty());
        assert_eq!(listener.pending_transactions(), 1);

        listener.on_commit(&set.transaction_id());
        assert_eq!(sink.len(), 1);
        assert_eq!(listener.pending_transactions(), 0);
    }

    #[test]
    fn test_rollback_discards_rows() {
        let sink = MemoryAuditSink::new();
        let listener = AuditListener::new(sink.clone());
        let kept = changes(0);
        let dropped = changes(1);

        listener.on_changes(&kept, &mut CommitScope::new()).unwrap();
        listener.on_changes(&dropped, &mut CommitScope::new()).unwrap();
        listener.on_rollback(&dropped.transaction_id());
        listener.on_commit(&kept.transaction_id());

        let rows = sink.entries();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].transaction_id, kept.transaction_id());
    }
}

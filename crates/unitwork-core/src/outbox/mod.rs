//! Transactional outbox.
//!
//! Every published change set becomes an [`OutboxEntry`]. The entry is
//! staged into the commit scope and lands in the same sled transaction as
//! the entity writes, so a rolled back transaction leaves no entry behind.
//!
//! The log sequence number (LSN) is assigned inside that transaction from a
//! persisted counter. LSN order is therefore commit order, and a reader that
//! resumes after the highest LSN it has seen misses nothing. The counter
//! outlives truncation and restarts, so an LSN is never reused.

use serde::{Deserialize, Serialize};
use sled::Tree;
use unitwork_proto::{ChangeSet, TransactionId};

use crate::error::{Error, ListenerError};
use crate::publish::{ChangeListener, CommitScope};
use crate::storage::key::{decode_lsn, lsn_key};
use crate::storage::read_last_lsn;
use crate::storage::EntityStore;

/// One committed change set in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Log sequence number.
    pub lsn: u64,
    /// Transaction that produced the change set.
    pub transaction_id: TransactionId,
    /// User on whose behalf the transaction ran.
    pub user: String,
    /// Change set timestamp in microseconds since Unix epoch.
    pub timestamp: u64,
    /// The published change set.
    pub changes: ChangeSet,
}

impl OutboxEntry {
    /// Whether the change set touches any of `entity_types`.
    pub fn touches_any(&self, entity_types: &[String]) -> bool {
        self.changes
            .entities()
            .iter()
            .any(|e| entity_types.iter().any(|t| t == &e.entity.entity_type))
    }

    fn decode(key: &[u8], value: &[u8]) -> Result<Self, Error> {
        let lsn = decode_lsn(key).ok_or_else(|| {
            Error::Deserialization(format!("invalid outbox key {}", hex::encode(key)))
        })?;
        let stored: StoredEntry =
            serde_json::from_slice(value).map_err(|e| Error::Deserialization(e.to_string()))?;
        Ok(Self {
            lsn,
            transaction_id: stored.transaction_id,
            user: stored.user,
            timestamp: stored.timestamp,
            changes: stored.changes,
        })
    }
}

/// Stored form of an entry. The LSN is the key.
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    transaction_id: TransactionId,
    user: String,
    timestamp: u64,
    changes: ChangeSet,
}

/// Persistent outbox stored beside the entities.
pub struct Outbox {
    tree: Tree,
    meta_tree: Tree,
}

impl Outbox {
    /// Open the outbox of `store`.
    pub fn open(store: &EntityStore) -> Result<Self, Error> {
        let outbox = Self {
            tree: store.outbox_tree().clone(),
            meta_tree: store.outbox_meta_tree().clone(),
        };
        tracing::debug!(
            current_lsn = outbox.current_lsn()?,
            entries = outbox.len(),
            "outbox opened"
        );
        Ok(outbox)
    }

    /// Highest LSN committed so far, including truncated entries.
    pub fn current_lsn(&self) -> Result<u64, Error> {
        read_last_lsn(&self.meta_tree)
    }

    /// Get an entry by LSN.
    pub fn get(&self, lsn: u64) -> Result<Option<OutboxEntry>, Error> {
        let key = lsn_key(lsn);
        match self.tree.get(key)? {
            Some(value) => Ok(Some(OutboxEntry::decode(&key, &value)?)),
            None => Ok(None),
        }
    }

    /// Iterate entries from `from_lsn` (inclusive) in LSN order.
    pub fn scan_from(&self, from_lsn: u64) -> impl Iterator<Item = Result<OutboxEntry, Error>> + '_ {
        self.tree
            .range(lsn_key(from_lsn)..)
            .map(|result| -> Result<OutboxEntry, Error> {
                let (key, value) = result?;
                OutboxEntry::decode(&key, &value)
            })
    }

    /// Read up to `batch_size` entries from `from_lsn`.
    ///
    /// The flag reports whether more entries follow.
    pub fn scan_batch(
        &self,
        from_lsn: u64,
        batch_size: usize,
    ) -> Result<(Vec<OutboxEntry>, bool), Error> {
        self.scan_filtered(from_lsn, batch_size, None)
    }

    /// Like [`Outbox::scan_batch`], keeping only entries touching one of
    /// `entity_types` when a filter is given.
    pub fn scan_filtered(
        &self,
        from_lsn: u64,
        batch_size: usize,
        entity_types: Option<&[String]>,
    ) -> Result<(Vec<OutboxEntry>, bool), Error> {
        let mut entries = Vec::with_capacity(batch_size.min(1000));
        let mut has_more = false;

        for result in self.scan_from(from_lsn) {
            let entry = result?;
            if let Some(types) = entity_types {
                if !entry.touches_any(types) {
                    continue;
                }
            }
            if entries.len() >= batch_size {
                has_more = true;
                break;
            }
            entries.push(entry);
        }

        Ok((entries, has_more))
    }

    /// Remove entries below `before_lsn`. Returns how many were removed.
    pub fn truncate_before(&self, before_lsn: u64) -> Result<u64, Error> {
        let mut removed = 0u64;
        for result in self.tree.range(..lsn_key(before_lsn)) {
            let (key, _) = result?;
            self.tree.remove(key)?;
            removed += 1;
        }
        tracing::debug!(before_lsn, removed, "outbox truncated");
        Ok(removed)
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether the outbox holds no entry.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl ChangeListener for Outbox {
    fn name(&self) -> &str {
        "outbox"
    }

    fn on_changes(&self, changes: &ChangeSet, scope: &mut CommitScope) -> Result<(), ListenerError> {
        changes
            .ensure_encodable()
            .map_err(|e| ListenerError::Serialization(e.to_string()))?;
        let entry = StoredEntry {
            transaction_id: changes.transaction_id(),
            user: changes.user().to_string(),
            timestamp: changes.timestamp(),
            changes: changes.clone(),
        };
        let value =
            serde_json::to_vec(&entry).map_err(|e| ListenerError::Serialization(e.to_string()))?;

        scope.stage_outbox(value);
        tracing::debug!(transaction = %entry.transaction_id, "outbox entry staged");
        Ok(())
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("current_lsn", &self.current_lsn().ok())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use unitwork_proto::{ChangeSetHeader, EntityRef, PropertyChange, TrackedEntity, Value};

    fn changes(entity_type: &str, n: u8) -> ChangeSet {
        ChangeSet::new(
            ChangeSetHeader::new(TransactionId::new([n; 16], 0), "ann", n as u64),
            vec![TrackedEntity::created(EntityRef::new(entity_type, [n; 16]))],
            vec![],
        )
    }

    /// Stage an entry and commit it the way a transaction would.
    fn commit(store: &EntityStore, outbox: &Outbox, set: &ChangeSet) -> u64 {
        let mut scope = CommitScope::new();
        outbox.on_changes(set, &mut scope).unwrap();
        store.apply(&[], scope.outbox_entries()).unwrap()[0]
    }

    #[test]
    fn test_staged_entry_invisible_until_applied() {
        let store = EntityStore::open(StorageConfig::temporary()).unwrap();
        let outbox = Outbox::open(&store).unwrap();

        let mut scope = CommitScope::new();
        outbox.on_changes(&changes("Customer", 1), &mut scope).unwrap();
        assert_eq!(outbox.current_lsn().unwrap(), 0);
        assert!(outbox.is_empty());

        store.apply(&[], scope.outbox_entries()).unwrap();
        let entry = outbox.get(1).unwrap().unwrap();
        assert_eq!(entry.lsn, 1);
        assert_eq!(entry.user, "ann");
        assert_eq!(entry.changes, changes("Customer", 1));
        assert_eq!(outbox.current_lsn().unwrap(), 1);
    }

    #[test]
    fn test_lsn_follows_commit_order_not_staging_order() {
        let store = EntityStore::open(StorageConfig::temporary()).unwrap();
        let outbox = Outbox::open(&store).unwrap();

        let mut early = CommitScope::new();
        outbox.on_changes(&changes("Customer", 1), &mut early).unwrap();
        let mut late = CommitScope::new();
        outbox.on_changes(&changes("Customer", 2), &mut late).unwrap();

        store.apply(&[], late.outbox_entries()).unwrap();
        let (seen, _) = outbox.scan_batch(1, 10).unwrap();
        assert_eq!(seen.len(), 1);
        let cursor = seen[0].lsn + 1;

        store.apply(&[], early.outbox_entries()).unwrap();
        let (next, _) = outbox.scan_batch(cursor, 10).unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].changes, changes("Customer", 1));
    }

    #[test]
    fn test_non_finite_float_rejected_before_staging() {
        let store = EntityStore::open(StorageConfig::temporary()).unwrap();
        let outbox = Outbox::open(&store).unwrap();
        let set = ChangeSet::new(
            ChangeSetHeader::new(TransactionId::new([5; 16], 0), "ann", 5),
            vec![TrackedEntity::updated(
                EntityRef::new("Sensor", [5; 16]),
                vec![PropertyChange::new(
                    "reading",
                    Value::Float64(1.0),
                    Value::Float64(f64::NAN),
                )],
            )],
            vec![],
        );

        let mut scope = CommitScope::new();
        assert!(matches!(
            outbox.on_changes(&set, &mut scope),
            Err(ListenerError::Serialization(_))
        ));
        assert!(scope.is_empty());
    }

    #[test]
    fn test_scan_batch_and_filter() {
        let store = EntityStore::open(StorageConfig::temporary()).unwrap();
        let outbox = Outbox::open(&store).unwrap();
        for n in 1..=4 {
            let ty = if n % 2 == 0 { "Order" } else { "Customer" };
            commit(&store, &outbox, &changes(ty, n));
        }

        let (batch, more) = outbox.scan_batch(2, 2).unwrap();
        assert_eq!(batch.iter().map(|e| e.lsn).collect::<Vec<_>>(), vec![2, 3]);
        assert!(more);

        let orders = vec!["Order".to_string()];
        let (filtered, more) = outbox.scan_filtered(0, 10, Some(&orders)).unwrap();
        assert_eq!(filtered.iter().map(|e| e.lsn).collect::<Vec<_>>(), vec![2, 4]);
        assert!(!more);
    }

    #[test]
    fn test_truncate_before() {
        let store = EntityStore::open(StorageConfig::temporary()).unwrap();
        let outbox = Outbox::open(&store).unwrap();
        for n in 1..=3 {
            commit(&store, &outbox, &changes("Customer", n));
        }

        assert_eq!(outbox.truncate_before(3).unwrap(), 2);
        assert_eq!(outbox.len(), 1);
        assert!(outbox.get(1).unwrap().is_none());
        assert_eq!(outbox.current_lsn().unwrap(), 3);
    }

    #[test]
    fn test_lsn_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = EntityStore::open(StorageConfig::new(dir.path())).unwrap();
            let outbox = Outbox::open(&store).unwrap();
            commit(&store, &outbox, &changes("Customer", 1));
            commit(&store, &outbox, &changes("Customer", 2));
            store.flush().unwrap();
        }

        let store = EntityStore::open(StorageConfig::new(dir.path())).unwrap();
        let outbox = Outbox::open(&store).unwrap();
        assert_eq!(outbox.current_lsn().unwrap(), 2);
        assert_eq!(commit(&store, &outbox, &changes("Customer", 3)), 3);
    }

    #[test]
    fn test_lsn_not_reused_after_full_truncate_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = EntityStore::open(StorageConfig::new(dir.path())).unwrap();
            let outbox = Outbox::open(&store).unwrap();
            commit(&store, &outbox, &changes("Customer", 1));
            commit(&store, &outbox, &changes("Customer", 2));
            let next = outbox.current_lsn().unwrap() + 1;
            assert_eq!(outbox.truncate_before(next).unwrap(), 2);
            assert!(outbox.is_empty());
            store.flush().unwrap();
        }

        let store = EntityStore::open(StorageConfig::new(dir.path())).unwrap();
        let outbox = Outbox::open(&store).unwrap();
        assert_eq!(outbox.current_lsn().unwrap(), 2);
        assert_eq!(commit(&store, &outbox, &changes("Customer", 3)), 3);
    }
}

//! Entity store implementation.

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use unitwork_proto::EntityRef;

use super::key::{decode_entity_key, decode_lsn, entity_key, lsn_key, type_prefix};
use super::{Record, StorageConfig};
use crate::error::Error;

/// Tree name for entity records.
const DATA_TREE: &str = "entities";

/// Tree name for the transactional outbox.
const OUTBOX_TREE: &str = "outbox";

/// Tree name for outbox bookkeeping.
const OUTBOX_META_TREE: &str = "outbox_meta";

/// Key of the highest LSN ever assigned, in the outbox meta tree.
const LAST_LSN_KEY: &[u8] = b"last_lsn";

/// One entity write applied at commit.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityWrite {
    /// Insert or replace the entity's record.
    Put(EntityRef, Record),
    /// Remove the entity.
    Remove(EntityRef),
}

impl EntityWrite {
    /// Entity targeted by this write.
    pub fn entity(&self) -> &EntityRef {
        match self {
            EntityWrite::Put(entity, _) | EntityWrite::Remove(entity) => entity,
        }
    }
}

/// The persistence layer the tracking pipeline sits on.
#[derive(Debug)]
pub struct EntityStore {
    /// The underlying sled database.
    db: Db,

    /// Tree for entity records.
    data_tree: Tree,

    /// Tree for outbox entries written in the same commit as entities.
    outbox_tree: Tree,

    /// Tree holding the LSN high-water mark.
    outbox_meta_tree: Tree,
}

impl EntityStore {
    /// Open or create a store with the given configuration.
    pub fn open(config: StorageConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let data_tree = db.open_tree(DATA_TREE)?;
        let outbox_tree = db.open_tree(OUTBOX_TREE)?;
        let outbox_meta_tree = db.open_tree(OUTBOX_META_TREE)?;
        Self::seed_last_lsn(&outbox_tree, &outbox_meta_tree)?;

        tracing::debug!(
            path = %config.path.display(),
            temporary = config.temporary,
            recovered = db.was_recovered(),
            "entity store opened"
        );

        Ok(Self {
            db,
            data_tree,
            outbox_tree,
            outbox_meta_tree,
        })
    }

    /// Initialize the LSN counter from the newest entry if it is missing.
    fn seed_last_lsn(outbox_tree: &Tree, meta_tree: &Tree) -> Result<(), Error> {
        if meta_tree.contains_key(LAST_LSN_KEY)? {
            return Ok(());
        }
        let last = match outbox_tree.last()? {
            Some((key, _)) => decode_lsn(&key).unwrap_or(0),
            None => 0,
        };
        meta_tree.insert(LAST_LSN_KEY, &lsn_key(last)[..])?;
        Ok(())
    }

    /// Generate a fresh entity id.
    pub fn generate_id() -> [u8; 16] {
        super::key::generate_id()
    }

    /// Get the record of an entity.
    pub fn get(&self, entity: &EntityRef) -> Result<Option<Record>, Error> {
        match self.data_tree.get(entity_key(entity))? {
            Some(bytes) => Ok(Some(Record::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Check whether an entity exists.
    pub fn contains(&self, entity: &EntityRef) -> Result<bool, Error> {
        Ok(self.data_tree.contains_key(entity_key(entity))?)
    }

    /// Write a record directly, outside any transaction.
    ///
    /// Intended for seeding; changes written this way are not tracked.
    pub fn put(&self, entity: &EntityRef, record: &Record) -> Result<(), Error> {
        self.data_tree.insert(entity_key(entity), record.to_bytes()?)?;
        Ok(())
    }

    /// Remove an entity directly, outside any transaction.
    pub fn remove(&self, entity: &EntityRef) -> Result<bool, Error> {
        Ok(self.data_tree.remove(entity_key(entity))?.is_some())
    }

    /// Iterate over every stored entity of a type.
    pub fn scan_type(
        &self,
        entity_type: &str,
    ) -> impl Iterator<Item = Result<(EntityRef, Record), Error>> + '_ {
        self.data_tree
            .scan_prefix(type_prefix(entity_type))
            .map(|result| -> Result<(EntityRef, Record), Error> {
                let (key, value) = result?;
                let entity = decode_entity_key(&key).ok_or_else(|| {
                    Error::Deserialization(format!("invalid entity key {}", hex::encode(&key)))
                })?;
                Ok((entity, Record::from_bytes(&value)?))
            })
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.data_tree.len()
    }

    /// Whether the store holds no entities.
    pub fn is_empty(&self) -> bool {
        self.data_tree.is_empty()
    }

    /// Apply entity writes and staged outbox entries atomically.
    ///
    /// Either every write lands or none does. Each outbox entry is keyed by
    /// the next LSN, assigned inside the commit so LSN order is commit
    /// order. Returns the assigned LSNs in staging order.
    pub fn apply(
        &self,
        writes: &[EntityWrite],
        outbox_entries: &[Vec<u8>],
    ) -> Result<Vec<u64>, Error> {
        if writes.is_empty() && outbox_entries.is_empty() {
            return Ok(Vec::new());
        }

        // Encode up front: the closure below may be retried on conflict.
        let mut encoded: Vec<(Vec<u8>, Option<Vec<u8>>)> = Vec::with_capacity(writes.len());
        for write in writes {
            match write {
                EntityWrite::Put(entity, record) => {
                    encoded.push((entity_key(entity), Some(record.to_bytes()?)))
                }
                EntityWrite::Remove(entity) => encoded.push((entity_key(entity), None)),
            }
        }

        let result: Result<Vec<u64>, TransactionError<Error>> =
            (&self.data_tree, &self.outbox_tree, &self.outbox_meta_tree).transaction(
                |(data_tx, outbox_tx, meta_tx)| {
                    for (key, value) in &encoded {
                        match value {
                            Some(bytes) => {
                                data_tx.insert(key.as_slice(), bytes.as_slice())?;
                            }
                            None => {
                                data_tx.remove(key.as_slice())?;
                            }
                        }
                    }

                    let mut lsns = Vec::with_capacity(outbox_entries.len());
                    if outbox_entries.is_empty() {
                        return Ok(lsns);
                    }
                    let mut lsn = match meta_tx.get(LAST_LSN_KEY)? {
                        Some(bytes) => decode_lsn(&bytes).ok_or_else(|| {
                            ConflictableTransactionError::Abort(Error::Deserialization(
                                "corrupt outbox LSN counter".to_string(),
                            ))
                        })?,
                        None => 0,
                    };
                    for value in outbox_entries {
                        lsn += 1;
                        outbox_tx.insert(&lsn_key(lsn)[..], value.as_slice())?;
                        lsns.push(lsn);
                    }
                    meta_tx.insert(LAST_LSN_KEY, &lsn_key(lsn)[..])?;
                    Ok::<Vec<u64>, ConflictableTransactionError<Error>>(lsns)
                },
            );

        match result {
            Ok(lsns) => Ok(lsns),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(Error::Storage(e)),
        }
    }

    /// Highest outbox LSN ever assigned.
    ///
    /// Survives truncation of the outbox and reopening the store.
    pub fn last_lsn(&self) -> Result<u64, Error> {
        read_last_lsn(&self.outbox_meta_tree)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    /// Get a reference to the outbox tree.
    pub(crate) fn outbox_tree(&self) -> &Tree {
        &self.outbox_tree
    }

    /// Get a reference to the outbox meta tree.
    pub(crate) fn outbox_meta_tree(&self) -> &Tree {
        &self.outbox_meta_tree
    }
}

/// Read the LSN high-water mark from an outbox meta tree.
pub(crate) fn read_last_lsn(meta_tree: &Tree) -> Result<u64, Error> {
    match meta_tree.get(LAST_LSN_KEY)? {
        Some(bytes) => decode_lsn(&bytes)
            .ok_or_else(|| Error::Deserialization("corrupt outbox LSN counter".to_string())),
        None => Ok(0),
    }
}

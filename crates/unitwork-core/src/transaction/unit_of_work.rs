//! A single unit of work.

use std::collections::HashMap;
use std::sync::Arc;

use unitwork_proto::{ChangeSet, ChangeSetHeader, EntityRef, PropertyFault, TransactionId, Value};

use super::coordinator::TransactionCoordinator;
use crate::error::{CollectError, Error};
use crate::metrics::TransactionOutcome;
use crate::publish::CommitScope;
use crate::storage::{key, EntityWrite, Record};
use crate::tracking::{ChangeCollector, EntityEvent, EntityObserver};

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting changes.
    Active,
    /// The change set has been frozen and delivered; only commit remains.
    Published,
    /// A failure occurred; the transaction can only roll back.
    RollbackOnly,
    /// Writes and listener side effects are durable.
    Committed,
    /// Nothing was written.
    RolledBack,
}

impl TransactionState {
    fn is_finished(self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::RolledBack)
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// Transaction that committed.
    pub transaction_id: TransactionId,
    /// The published change set, if anything tracked changed.
    pub changes: Option<Arc<ChangeSet>>,
    /// Entity writes applied to the store.
    pub entity_writes: usize,
    /// Writes staged by listeners and applied in the same commit.
    pub staged_writes: usize,
    /// LSNs assigned to this commit's outbox entries.
    pub outbox_lsns: Vec<u64>,
}

/// What the transaction currently sees for an entity.
enum Lookup {
    Live(Record),
    DeletedHere,
    Missing,
}

/// A unit of work over the entity store.
///
/// Writes go to a private cache and reach the store only on commit. Every
/// write is reported to the transaction's collector with the value it
/// replaced, so the change set published at commit holds the net effect.
/// Dropping an unfinished transaction rolls it back.
pub struct Transaction<'a> {
    coordinator: &'a TransactionCoordinator,
    id: TransactionId,
    user: String,
    state: TransactionState,
    collector: ChangeCollector,
    /// Uncommitted entity state; `None` marks a removal.
    write_cache: HashMap<EntityRef, Option<Record>>,
    /// Cache keys in first-write order.
    write_order: Vec<EntityRef>,
    scope: CommitScope,
    published: Option<Arc<ChangeSet>>,
    /// Whether listeners were handed a change set and must hear the outcome.
    listeners_notified: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(
        coordinator: &'a TransactionCoordinator,
        interaction: [u8; 16],
        sequence: u32,
        user: String,
    ) -> Self {
        let id = TransactionId::new(interaction, sequence);
        if let Some(metrics) = coordinator.metrics() {
            metrics.record_begin();
        }
        tracing::debug!(transaction = %id, user = %user, "transaction begun");

        Self {
            coordinator,
            id,
            user,
            state: TransactionState::Active,
            collector: ChangeCollector::new(Arc::clone(coordinator.policy())),
            write_cache: HashMap::new(),
            write_order: Vec::new(),
            scope: CommitScope::new(),
            published: None,
            listeners_notified: false,
        }
    }

    /// Transaction id.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// User the transaction runs for.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Create an entity of `entity_type` with a fresh id.
    pub fn create(
        &mut self,
        entity_type: impl Into<String>,
        fields: Record,
    ) -> Result<EntityRef, Error> {
        let entity = EntityRef::new(entity_type, key::generate_id());
        self.create_with_id(entity.clone(), fields)?;
        Ok(entity)
    }

    /// Create an entity with a caller-chosen id.
    pub fn create_with_id(&mut self, entity: EntityRef, fields: Record) -> Result<(), Error> {
        self.ensure_active()?;
        if let Lookup::Live(_) = self.lookup(&entity)? {
            return Err(CollectError::AlreadyCreated(entity).into());
        }

        self.collector.on_created(entity.clone())?;
        self.cache_write(entity, Some(fields));
        Ok(())
    }

    /// Read an entity as this transaction sees it.
    pub fn read(&self, entity: &EntityRef) -> Result<Option<Record>, Error> {
        match self.lookup(entity)? {
            Lookup::Live(record) => Ok(Some(record)),
            Lookup::DeletedHere | Lookup::Missing => Ok(None),
        }
    }

    /// Assign a property.
    ///
    /// If the previous value cannot be read the write still applies and the
    /// property is reported as a [`CollectError::UnreadableProperty`]; the
    /// transaction stays usable.
    pub fn set(
        &mut self,
        entity: &EntityRef,
        property: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), Error> {
        self.ensure_active()?;
        let mut record = match self.lookup(entity)? {
            Lookup::Live(record) => record,
            Lookup::DeletedHere => return Err(CollectError::AlreadyDeleted(entity.clone()).into()),
            Lookup::Missing => return Err(Error::NotFound(entity.clone())),
        };

        let property = property.into();
        let value = value.into();
        let old = record.get(&property);
        record.set(property.clone(), &value)?;
        self.cache_write(entity.clone(), Some(record));

        self.collector
            .on_property_set(entity.clone(), property, old, Ok(value))?;
        Ok(())
    }

    /// Delete an entity.
    pub fn delete(&mut self, entity: &EntityRef) -> Result<(), Error> {
        self.ensure_active()?;
        match self.lookup(entity)? {
            Lookup::Live(_) => {}
            Lookup::DeletedHere => return Err(CollectError::AlreadyDeleted(entity.clone()).into()),
            Lookup::Missing => return Err(Error::NotFound(entity.clone())),
        }

        self.collector.on_deleted(entity.clone())?;
        self.cache_write(entity.clone(), None);
        Ok(())
    }

    /// Report a change made by another producer in this unit of work.
    ///
    /// The event is tracked and published but nothing is written to the store.
    pub fn observe(&mut self, event: EntityEvent) -> Result<(), Error> {
        self.ensure_active()?;
        self.collector.observe(event)?;
        Ok(())
    }

    /// Unreadable properties recorded so far.
    pub fn faults(&self) -> Vec<PropertyFault> {
        self.collector.faults()
    }

    /// Freeze the change set and hand it to every listener.
    ///
    /// Runs at most once: later calls return the same change set without
    /// publishing again. Returns `None` when nothing tracked changed. A
    /// listener failure marks the transaction rollback-only.
    pub fn pre_commit(&mut self) -> Result<Option<Arc<ChangeSet>>, Error> {
        match self.state {
            TransactionState::Active => {}
            TransactionState::Published => return Ok(self.published.clone()),
            TransactionState::RollbackOnly => return Err(Error::RollbackOnly(self.id)),
            TransactionState::Committed | TransactionState::RolledBack => {
                return Err(Error::TransactionClosed(self.id))
            }
        }

        let header = ChangeSetHeader::new(self.id, self.user.clone(), key::current_timestamp());
        let changes = self.collector.build(header);
        if changes.is_empty() {
            tracing::debug!(transaction = %self.id, "nothing to publish");
            self.state = TransactionState::Published;
            return Ok(None);
        }

        self.listeners_notified = true;
        if let Err(e) = self
            .coordinator
            .publisher()
            .publish(&changes, &mut self.scope)
        {
            self.state = TransactionState::RollbackOnly;
            return Err(e.into());
        }

        let changes = Arc::new(changes);
        self.published = Some(Arc::clone(&changes));
        self.state = TransactionState::Published;
        Ok(Some(changes))
    }

    /// Publish, then apply entity writes and listener-staged writes atomically.
    ///
    /// On failure nothing reaches the store, listeners are told the
    /// transaction rolled back and the error is returned.
    pub fn commit(mut self) -> Result<CommitOutcome, Error> {
        let changes = match self.pre_commit() {
            Ok(changes) => changes,
            Err(e) => {
                self.abort();
                return Err(e);
            }
        };

        let writes = self.pending_writes();
        let staged = self.scope.outbox_entries().len();
        let outbox_lsns = match self
            .coordinator
            .store()
            .apply(&writes, self.scope.outbox_entries())
        {
            Ok(lsns) => lsns,
            Err(e) => {
                self.state = TransactionState::RollbackOnly;
                self.abort();
                return Err(e);
            }
        };

        self.state = TransactionState::Committed;
        if self.listeners_notified {
            self.coordinator.publisher().notify_committed(&self.id);
        }
        if let Some(metrics) = self.coordinator.metrics() {
            metrics.record_outcome(TransactionOutcome::Committed);
        }
        tracing::info!(
            transaction = %self.id,
            user = %self.user,
            entity_writes = writes.len(),
            staged_writes = staged,
            "transaction committed"
        );

        Ok(CommitOutcome {
            transaction_id: self.id,
            changes,
            entity_writes: writes.len(),
            staged_writes: staged,
            outbox_lsns,
        })
    }

    /// Discard every change.
    pub fn rollback(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if self.state.is_finished() {
            return;
        }
        let was = self.state;
        self.state = TransactionState::RolledBack;
        self.write_cache.clear();
        self.write_order.clear();
        self.scope.clear();

        if self.listeners_notified {
            self.coordinator.publisher().notify_rolled_back(&self.id);
        }
        if let Some(metrics) = self.coordinator.metrics() {
            metrics.record_outcome(TransactionOutcome::RolledBack);
        }

        if was == TransactionState::RollbackOnly {
            tracing::warn!(transaction = %self.id, user = %self.user, "transaction rolled back after failure");
        } else {
            tracing::info!(transaction = %self.id, user = %self.user, "transaction rolled back");
        }
    }

    fn ensure_active(&self) -> Result<(), Error> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::RollbackOnly => Err(Error::RollbackOnly(self.id)),
            TransactionState::Published
            | TransactionState::Committed
            | TransactionState::RolledBack => Err(Error::TransactionClosed(self.id)),
        }
    }

    fn lookup(&self, entity: &EntityRef) -> Result<Lookup, Error> {
        match self.write_cache.get(entity) {
            Some(Some(record)) => Ok(Lookup::Live(record.clone())),
            Some(None) => Ok(Lookup::DeletedHere),
            None => Ok(match self.coordinator.store().get(entity)? {
                Some(record) => Lookup::Live(record),
                None => Lookup::Missing,
            }),
        }
    }

    fn cache_write(&mut self, entity: EntityRef, record: Option<Record>) {
        if !self.write_cache.contains_key(&entity) {
            self.write_order.push(entity.clone());
        }
        self.write_cache.insert(entity, record);
    }

    fn pending_writes(&self) -> Vec<EntityWrite> {
        self.write_order
            .iter()
            .filter_map(|entity| {
                self.write_cache.get(entity).map(|record| match record {
                    Some(record) => EntityWrite::Put(entity.clone(), record.clone()),
                    None => EntityWrite::Remove(entity.clone()),
                })
            })
            .collect()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.state.is_finished() {
            tracing::debug!(transaction = %self.id, "unfinished transaction dropped");
            self.abort();
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("state", &self.state)
            .field("pending_writes", &self.write_order.len())
            .finish()
    }
}

//! Domain events broadcast after commit.
//!
//! [`DomainEventBus`] is a change listener that maps each published change
//! set to one [`DomainEvent`] per entity, holds them until the transaction
//! commits and then broadcasts them over a tokio broadcast channel.
//! Subscribers that fall behind by more than the channel capacity skip the
//! events they missed.

use std::collections::HashSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use unitwork_proto::{ChangeKind, ChangeSet, EntityRef, TransactionId};

use crate::error::ListenerError;
use crate::publish::{ChangeListener, CommitScope};

/// Default broadcast channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Notification that an entity changed in a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Transaction that made the change.
    pub transaction_id: TransactionId,
    /// Changed entity.
    pub entity: EntityRef,
    /// Net lifecycle state.
    pub kind: ChangeKind,
    /// Changed properties; empty for created and deleted entities.
    pub changed_properties: Vec<String>,
}

impl DomainEvent {
    /// One event per entity of `changes`, in change set order.
    pub fn from_change_set(changes: &ChangeSet) -> Vec<DomainEvent> {
        changes
            .entities()
            .iter()
            .map(|tracked| DomainEvent {
                transaction_id: changes.transaction_id(),
                entity: tracked.entity.clone(),
                kind: tracked.kind,
                changed_properties: tracked.changed_properties(),
            })
            .collect()
    }
}

/// Broadcasts committed changes to in-process subscribers.
#[derive(Debug)]
pub struct DomainEventBus {
    sender: broadcast::Sender<DomainEvent>,
    staged: DashMap<TransactionId, Vec<DomainEvent>>,
}

impl DomainEventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            staged: DashMap::new(),
        }
    }

    /// Subscribe to every event.
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
            entity_types: None,
        }
    }

    /// Subscribe to events about the given entity types only.
    pub fn subscribe_to<I, S>(&self, entity_types: I) -> EventSubscriber
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EventSubscriber {
            receiver: self.sender.subscribe(),
            entity_types: Some(entity_types.into_iter().map(Into::into).collect()),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for DomainEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl ChangeListener for DomainEventBus {
    fn name(&self) -> &str {
        "domain-events"
    }

    fn on_changes(&self, changes: &ChangeSet, _scope: &mut CommitScope) -> Result<(), ListenerError> {
        self.staged
            .insert(changes.transaction_id(), DomainEvent::from_change_set(changes));
        Ok(())
    }

    fn on_commit(&self, transaction_id: &TransactionId) {
        let Some((_, events)) = self.staged.remove(transaction_id) else {
            return;
        };
        let count = events.len();
        for event in events {
            // No subscribers is not an error.
            let _ = self.sender.send(event);
        }
        tracing::debug!(transaction = %transaction_id, events = count, "domain events broadcast");
    }

    fn on_rollback(&self, transaction_id: &TransactionId) {
        self.staged.remove(transaction_id);
    }
}

/// Receiving end of a [`DomainEventBus`] subscription.
#[derive(Debug)]
pub struct EventSubscriber {
    receiver: broadcast::Receiver<DomainEvent>,
    entity_types: Option<HashSet<String>>,
}

impl EventSubscriber {
    fn wants(&self, event: &DomainEvent) -> bool {
        match &self.entity_types {
            Some(types) => types.contains(&event.entity.entity_type),
            None => true,
        }
    }

    /// Wait for the next matching event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<DomainEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

//! Core error types.

use thiserror::Error;
use unitwork_proto::{EntityRef, TransactionId};

/// Core errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Data model error.
    #[error("data model error: {0}")]
    Proto(#[from] unitwork_proto::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Entity not found in the store or the transaction's write cache.
    #[error("entity not found: {0}")]
    NotFound(EntityRef),

    /// A change could not be collected. Recoverable: the transaction stays usable.
    #[error(transparent)]
    Collect(#[from] CollectError),

    /// A listener rejected the change set. Fatal to the transaction.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// The listener registry could not be built.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The transaction has been marked for rollback and can only be rolled back.
    #[error("transaction {0} is marked for rollback")]
    RollbackOnly(TransactionId),

    /// The transaction no longer accepts changes (published, committed or rolled back).
    #[error("transaction {0} is closed")]
    TransactionClosed(TransactionId),
}

/// Errors raised while recording an entity lifecycle event.
///
/// These never discard what has already been collected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectError {
    /// The old or new value of a property could not be read.
    ///
    /// The fault is kept in the change set and the property is left out of
    /// the deltas.
    #[error("unreadable property {entity}.{property}: {reason}")]
    UnreadableProperty {
        /// Entity owning the property.
        entity: EntityRef,
        /// Property name.
        property: String,
        /// Reason reported by the producer.
        reason: String,
    },

    /// A create was reported for an entity that is already tracked as alive.
    #[error("entity {0} already exists in this transaction")]
    AlreadyCreated(EntityRef),

    /// An event was reported for an entity already deleted in this transaction.
    #[error("entity {0} was deleted earlier in this transaction")]
    AlreadyDeleted(EntityRef),
}

/// Error returned by a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The listener refused the change set.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The listener failed to encode what it stages.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The listener's own storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
}

impl ListenerError {
    /// Create a rejection with a message.
    pub fn rejected(message: impl Into<String>) -> Self {
        ListenerError::Rejected(message.into())
    }
}

/// A listener failed during pre-commit publication.
#[derive(Debug, Error)]
#[error("listener '{listener}' failed for transaction {transaction_id}: {source}")]
pub struct PublishError {
    /// Name of the failing listener.
    pub listener: String,
    /// Transaction whose change set was being published.
    pub transaction_id: TransactionId,
    /// Underlying listener error.
    #[source]
    pub source: ListenerError,
}

/// Errors raised while building the listener registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Two listeners share a name.
    #[error("listener '{0}' is already registered")]
    DuplicateListener(String),
}

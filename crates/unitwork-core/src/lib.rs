//! Unitwork Core - change tracking, pre-commit publication and listeners.
//!
//! A [`TransactionCoordinator`] runs units of work over a sled-backed
//! [`EntityStore`]. Each [`Transaction`] collects the net effect of its
//! entity writes into an immutable [`ChangeSet`](proto::ChangeSet) and
//! delivers it once, before commit, to every registered [`ChangeListener`].
//! A failing listener aborts the commit.

pub mod audit;
pub mod error;
pub mod events;
pub mod metrics;
pub mod outbox;
pub mod publish;
pub mod storage;
pub mod tracking;
pub mod transaction;

pub use error::{CollectError, Error, ListenerError, PublishError, RegistryError};
pub use storage::{EntityStore, EntityWrite, Record, StorageConfig};
pub use tracking::{
    collect, ChangeCollector, EntityEvent, EntityObserver, Observed, ReadFault, TrackingPolicy,
};
pub use transaction::{
    CommitOutcome, Interaction, Transaction, TransactionCoordinator, TransactionState,
};

// Publication exports
pub use publish::{ChangeListener, ChangePublisher, CommitScope, ListenerRegistry};

// Listener exports
pub use audit::{
    AuditEntry, AuditError, AuditListener, AuditSink, MemoryAuditSink, NullAuditSink,
    TracingAuditSink,
};
pub use events::{DomainEvent, DomainEventBus, EventSubscriber};
pub use outbox::{Outbox, OutboxEntry};

// Metrics exports
pub use metrics::{new_shared_registry, Histogram, MetricsRegistry, SharedMetricsRegistry};

/// Re-export data model types.
pub use unitwork_proto as proto;

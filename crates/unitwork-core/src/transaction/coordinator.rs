//! Transaction coordinator.

use std::sync::Arc;

use crate::metrics::SharedMetricsRegistry;
use crate::publish::{ChangePublisher, ListenerRegistry};
use crate::storage::{key, EntityStore};
use crate::tracking::TrackingPolicy;

use super::unit_of_work::Transaction;

/// Owns everything a transaction needs to track, publish and commit.
///
/// One coordinator is built at startup and handed to the code that runs
/// user interactions. It is `Send + Sync`; transactions borrow it.
#[derive(Debug)]
pub struct TransactionCoordinator {
    store: Arc<EntityStore>,
    publisher: ChangePublisher,
    policy: Arc<TrackingPolicy>,
    metrics: Option<SharedMetricsRegistry>,
}

impl TransactionCoordinator {
    /// Create a coordinator publishing to `listeners`.
    pub fn new(store: Arc<EntityStore>, listeners: Arc<ListenerRegistry>) -> Self {
        Self {
            store,
            publisher: ChangePublisher::new(listeners),
            policy: Arc::new(TrackingPolicy::default()),
            metrics: None,
        }
    }

    /// Restrict what collectors track.
    pub fn with_policy(mut self, policy: TrackingPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Record transaction and publication metrics into `metrics`.
    pub fn with_metrics(mut self, metrics: SharedMetricsRegistry) -> Self {
        self.publisher = self.publisher.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    /// Start an interaction on behalf of `user`.
    pub fn interaction(&self, user: impl Into<String>) -> Interaction<'_> {
        Interaction {
            coordinator: self,
            id: key::generate_id(),
            user: user.into(),
            next_sequence: 0,
        }
    }

    /// Start a single-transaction interaction.
    pub fn begin(&self, user: impl Into<String>) -> Transaction<'_> {
        self.interaction(user).begin()
    }

    /// The entity store.
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// The publisher used at pre-commit.
    pub fn publisher(&self) -> &ChangePublisher {
        &self.publisher
    }

    /// The tracking policy handed to each collector.
    pub fn policy(&self) -> &Arc<TrackingPolicy> {
        &self.policy
    }

    /// The metrics registry, if one is attached.
    pub fn metrics(&self) -> Option<&SharedMetricsRegistry> {
        self.metrics.as_ref()
    }
}

/// One user request, which may run several transactions one after another.
///
/// Transactions of an interaction share its id and user and are numbered
/// in the order they begin.
#[derive(Debug)]
pub struct Interaction<'a> {
    coordinator: &'a TransactionCoordinator,
    id: [u8; 16],
    user: String,
    next_sequence: u32,
}

impl<'a> Interaction<'a> {
    /// Begin the next transaction of this interaction.
    pub fn begin(&mut self) -> Transaction<'a> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Transaction::new(self.coordinator, self.id, sequence, self.user.clone())
    }

    /// Interaction id.
    pub fn id(&self) -> [u8; 16] {
        self.id
    }

    /// User the interaction runs for.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Number of transactions begun so far.
    pub fn transactions_begun(&self) -> u32 {
        self.next_sequence
    }
}

//! Pre-commit publication of change sets.

use std::sync::Arc;
use std::time::Instant;

use unitwork_proto::{ChangeSet, TransactionId};

use super::registry::ListenerRegistry;
use super::scope::CommitScope;
use crate::error::PublishError;
use crate::metrics::SharedMetricsRegistry;

/// Hands committed change sets to every registered listener.
#[derive(Debug, Clone)]
pub struct ChangePublisher {
    registry: Arc<ListenerRegistry>,
    metrics: Option<SharedMetricsRegistry>,
}

impl ChangePublisher {
    /// Create a publisher over an immutable registry.
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        Self {
            registry,
            metrics: None,
        }
    }

    /// Record publication metrics into `metrics`.
    pub fn with_metrics(mut self, metrics: SharedMetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The registry this publisher notifies.
    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Deliver `changes` to each listener in registration order.
    ///
    /// Stops at the first failing listener. Empty change sets are not
    /// delivered.
    pub fn publish(&self, changes: &ChangeSet, scope: &mut CommitScope) -> Result<(), PublishError> {
        if changes.is_empty() {
            return Ok(());
        }

        let transaction_id = changes.transaction_id();
        let start = Instant::now();

        for listener in self.registry.iter() {
            tracing::debug!(
                listener = listener.name(),
                transaction = %transaction_id,
                entities = changes.len(),
                "publishing change set"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_listener(listener.name());
            }

            if let Err(source) = listener.on_changes(changes, scope) {
                tracing::warn!(
                    listener = listener.name(),
                    transaction = %transaction_id,
                    error = %source,
                    "listener rejected change set"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_publish_failure();
                }
                return Err(PublishError {
                    listener: listener.name().to_string(),
                    transaction_id,
                    source,
                });
            }
        }

        let elapsed_us = start.elapsed().as_micros() as u64;
        if let Some(metrics) = &self.metrics {
            metrics.record_published(&changes.summary(), changes.faults().len(), elapsed_us);
        }
        tracing::debug!(
            transaction = %transaction_id,
            listeners = self.registry.len(),
            elapsed_us,
            "change set published"
        );
        Ok(())
    }

    /// Tell every listener the transaction committed.
    pub fn notify_committed(&self, transaction_id: &TransactionId) {
        for listener in self.registry.iter() {
            listener.on_commit(transaction_id);
        }
    }

    /// Tell every listener the transaction rolled back.
    pub fn notify_rolled_back(&self, transaction_id: &TransactionId) {
        for listener in self.registry.iter() {
            listener.on_rollback(transaction_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ListenerError;
    use crate::metrics::new_shared_registry;
    use crate::publish::ChangeListener;
    use parking_lot::Mutex;
    use unitwork_proto::{ChangeSetHeader, EntityRef, TrackedEntity};

    /// Records every callback it receives into a shared journal.
    struct Recorder {
        name: &'static str,
        fail: bool,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn new(name: &'static str, fail: bool, journal: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                journal: Arc::clone(journal),
            })
        }
    }

    impl ChangeListener for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn on_changes(&self, _: &ChangeSet, _: &mut CommitScope) -> Result<(), ListenerError> {
            self.journal.lock().push(format!("{}:changes", self.name));
            if self.fail {
                return Err(ListenerError::rejected("no"));
            }
            Ok(())
        }

        fn on_commit(&self, _: &TransactionId) {
            self.journal.lock().push(format!("{}:commit", self.name));
        }

        fn on_rollback(&self, _: &TransactionId) {
            self.journal.lock().push(format!("{}:rollback", self.name));
        }
    }

    fn changes(entities: Vec<TrackedEntity>) -> ChangeSet {
        ChangeSet::new(
            ChangeSetHeader::new(TransactionId::new([5; 16], 0), "tester", 1),
            entities,
            vec![],
        )
    }

    fn created() -> ChangeSet {
        changes(vec![TrackedEntity::created(EntityRef::new("Customer", [1; 16]))])
    }

    #[test]
    fn test_publish_in_registration_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let registry = ListenerRegistry::new()
            .register(Recorder::new("a", false, &journal))
            .unwrap()
            .register(Recorder::new("b", false, &journal))
            .unwrap();
        let publisher = ChangePublisher::new(Arc::new(registry));

        publisher.publish(&created(), &mut CommitScope::new()).unwrap();
        publisher.notify_committed(&TransactionId::new([5; 16], 0));

        assert_eq!(
            *journal.lock(),
            vec!["a:changes", "b:changes", "a:commit", "b:commit"]
        );
    }

    #[test]
    fn test_first_failure_stops_publication() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let metrics = new_shared_registry();
        let registry = ListenerRegistry::new()
            .register(Recorder::new("a", true, &journal))
            .unwrap()
            .register(Recorder::new("b", false, &journal))
            .unwrap();
        let publisher = ChangePublisher::new(Arc::new(registry)).with_metrics(metrics.clone());

        let err = publisher
            .publish(&created(), &mut CommitScope::new())
            .unwrap_err();

        assert_eq!(err.listener, "a");
        assert_eq!(*journal.lock(), vec!["a:changes"]);
        assert_eq!(metrics.publish_failures(), 1);
        assert_eq!(metrics.change_sets_published(), 0);
    }

    #[test]
    fn test_empty_change_set_not_delivered() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let registry = ListenerRegistry::new()
            .register(Recorder::new("a", false, &journal))
            .unwrap();
        let publisher = ChangePublisher::new(Arc::new(registry));

        publisher.publish(&changes(vec![]), &mut CommitScope::new()).unwrap();
        assert!(journal.lock().is_empty());
    }

    #[test]
    fn test_zero_listeners_publish() {
        let metrics = new_shared_registry();
        let publisher =
            ChangePublisher::new(Arc::new(ListenerRegistry::new())).with_metrics(metrics.clone());

        publisher.publish(&created(), &mut CommitScope::new()).unwrap();
        assert_eq!(metrics.change_sets_published(), 1);
        assert_eq!(metrics.entities_created(), 1);
    }
}

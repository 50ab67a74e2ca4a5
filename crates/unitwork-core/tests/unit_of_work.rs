//! Integration tests for the tracking and publication pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use unitwork_core::audit::{AuditListener, MemoryAuditSink};
use unitwork_core::events::DomainEventBus;
use unitwork_core::metrics::{new_shared_registry, SharedMetricsRegistry};
use unitwork_core::outbox::Outbox;
use unitwork_core::publish::{ChangeListener, CommitScope, ListenerRegistry};
use unitwork_core::storage::{EntityStore, Record, StorageConfig};
use unitwork_core::transaction::{TransactionCoordinator, TransactionState};
use unitwork_core::tracking::EntityEvent;
use unitwork_core::{Error, ListenerError, TrackingPolicy};
use unitwork_proto::{ChangeKind, ChangeSet, EntityRef, TransactionId, Value};

/// Counts change sets and rejects them when asked to.
#[derive(Default)]
struct Gate {
    reject: bool,
    calls: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl Gate {
    fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ChangeListener for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    fn on_changes(&self, _: &ChangeSet, _: &mut CommitScope) -> Result<(), ListenerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(ListenerError::rejected("validation failed"));
        }
        Ok(())
    }

    fn on_commit(&self, _: &TransactionId) {
        self.commits.fetch_add(1, Ordering::SeqCst);
    }

    fn on_rollback(&self, _: &TransactionId) {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
    }
}

struct TestContext {
    coordinator: TransactionCoordinator,
    audit: MemoryAuditSink,
    outbox: Arc<Outbox>,
    events: Arc<DomainEventBus>,
    gate: Arc<Gate>,
    metrics: SharedMetricsRegistry,
    _dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self::with_gate(Gate::default())
    }

    fn with_gate(gate: Gate) -> Self {
        Self::build(gate, TrackingPolicy::default())
    }

    fn build(gate: Gate, policy: TrackingPolicy) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EntityStore::open(StorageConfig::new(dir.path())).unwrap());
        let audit = MemoryAuditSink::new();
        let outbox = Arc::new(Outbox::open(&store).unwrap());
        let events = Arc::new(DomainEventBus::default());
        let gate = Arc::new(gate);
        let metrics = new_shared_registry();

        // The gate runs last so that earlier listeners have already staged.
        let registry = ListenerRegistry::new()
            .register(Arc::new(AuditListener::new(audit.clone())))
            .unwrap()
            .register(outbox.clone())
            .unwrap()
            .register(events.clone())
            .unwrap()
            .register(gate.clone())
            .unwrap();

        let coordinator = TransactionCoordinator::new(store, Arc::new(registry))
            .with_policy(policy)
            .with_metrics(metrics.clone());

        Self {
            coordinator,
            audit,
            outbox,
            events,
            gate,
            metrics,
            _dir: dir,
        }
    }

    fn store(&self) -> &EntityStore {
        self.coordinator.store()
    }

    fn seed(&self, entity: &EntityRef, name: &str) {
        self.store().put(entity, &named(name)).unwrap();
    }
}

fn named(name: &str) -> Record {
    Record::from_fields([("name", Value::from(name))]).unwrap()
}

fn entity(ty: &str, n: u8) -> EntityRef {
    EntityRef::new(ty, [n; 16])
}

#[test]
fn test_commit_reaches_every_listener() {
    let ctx = TestContext::new();
    let existing = entity("Customer", 1);
    ctx.seed(&existing, "Ann");
    let mut subscriber = ctx.events.subscribe();

    let mut tx = ctx.coordinator.begin("clerk");
    let created = tx.create("Order", named("first")).unwrap();
    tx.set(&existing, "name", "Anne").unwrap();
    let outcome = tx.commit().unwrap();

    let changes = outcome.changes.unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes.get(&created).unwrap().kind, ChangeKind::Created);
    assert_eq!(changes.user(), "clerk");

    let rows = ctx.audit.entries();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].is_new());
    assert_eq!(rows[1].old_value, Value::from("Ann"));
    assert_eq!(rows[1].new_value, Value::from("Anne"));

    assert_eq!(ctx.outbox.len(), 1);
    assert_eq!(ctx.outbox.get(1).unwrap().unwrap().changes, *changes);
    assert_eq!(outcome.staged_writes, 1);

    assert_eq!(subscriber.try_recv().unwrap().entity, created);
    assert_eq!(subscriber.try_recv().unwrap().entity, existing);

    assert_eq!(ctx.gate.commits.load(Ordering::SeqCst), 1);
    assert_eq!(
        ctx.store().get(&existing).unwrap().unwrap().get("name").unwrap(),
        Value::from("Anne")
    );
}

#[test]
fn test_failing_listener_aborts_commit() {
    let ctx = TestContext::with_gate(Gate::rejecting());
    let existing = entity("Customer", 1);
    ctx.seed(&existing, "Ann");
    let mut subscriber = ctx.events.subscribe();

    let mut tx = ctx.coordinator.begin("clerk");
    let created = tx.create("Customer", named("Bob")).unwrap();
    tx.set(&existing, "name", "Anne").unwrap();

    let err = tx.commit().unwrap_err();
    match err {
        Error::Publish(e) => assert_eq!(e.listener, "gate"),
        other => panic!("expected publish error, got {:?}", other),
    }

    // Nothing any listener staged became visible.
    assert!(ctx.audit.is_empty());
    assert!(ctx.outbox.is_empty());
    assert!(subscriber.try_recv().is_none());
    assert_eq!(ctx.gate.rollbacks.load(Ordering::SeqCst), 1);

    assert!(ctx.store().get(&created).unwrap().is_none());
    assert_eq!(
        ctx.store().get(&existing).unwrap().unwrap().get("name").unwrap(),
        Value::from("Ann")
    );
    assert_eq!(ctx.metrics.transactions_rolled_back(), 1);
    assert_eq!(ctx.metrics.publish_failures(), 1);
}

#[test]
fn test_failed_pre_commit_marks_rollback_only() {
    let ctx = TestContext::with_gate(Gate::rejecting());
    let mut tx = ctx.coordinator.begin("clerk");
    let created = tx.create("Customer", named("Bob")).unwrap();

    assert!(matches!(tx.pre_commit(), Err(Error::Publish(_))));
    assert_eq!(tx.state(), TransactionState::RollbackOnly);
    assert!(matches!(
        tx.set(&created, "name", "Cid"),
        Err(Error::RollbackOnly(_))
    ));
    assert!(matches!(tx.pre_commit(), Err(Error::RollbackOnly(_))));
    assert!(matches!(tx.commit(), Err(Error::RollbackOnly(_))));

    assert_eq!(ctx.gate.calls(), 1);
    assert!(ctx.store().is_empty());
}

#[test]
fn test_repeated_pre_commit_publishes_once() {
    let ctx = TestContext::new();
    let mut tx = ctx.coordinator.begin("clerk");
    tx.create("Customer", named("Ann")).unwrap();

    let first = tx.pre_commit().unwrap().unwrap();
    let second = tx.pre_commit().unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(tx.state(), TransactionState::Published);

    let outcome = tx.commit().unwrap();
    assert!(Arc::ptr_eq(&first, &outcome.changes.unwrap()));
    assert_eq!(ctx.gate.calls(), 1);
    assert_eq!(ctx.audit.len(), 1);
    assert_eq!(ctx.outbox.len(), 1);
    assert_eq!(ctx.metrics.change_sets_published(), 1);
}

#[test]
fn test_zero_listeners() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EntityStore::open(StorageConfig::new(dir.path())).unwrap());
    let coordinator = TransactionCoordinator::new(store, Arc::new(ListenerRegistry::new()));

    let mut tx = coordinator.begin("clerk");
    let created = tx.create("Customer", named("Ann")).unwrap();
    let outcome = tx.commit().unwrap();

    assert_eq!(outcome.changes.unwrap().len(), 1);
    assert!(coordinator.store().contains(&created).unwrap());
}

#[test]
fn test_create_then_delete_publishes_nothing() {
    let ctx = TestContext::new();
    let mut tx = ctx.coordinator.begin("clerk");
    let created = tx.create("Customer", named("Ann")).unwrap();
    tx.set(&created, "name", "Bob").unwrap();
    tx.delete(&created).unwrap();

    let outcome = tx.commit().unwrap();
    assert!(outcome.changes.is_none());
    assert_eq!(ctx.gate.calls(), 0);
    assert!(ctx.audit.is_empty());
    assert!(ctx.outbox.is_empty());
    assert!(!ctx.store().contains(&created).unwrap());
}

#[test]
fn test_net_change_across_writes() {
    let ctx = TestContext::new();
    let existing = entity("Customer", 1);
    ctx.seed(&existing, "v0");

    let mut tx = ctx.coordinator.begin("clerk");
    tx.set(&existing, "name", "v1").unwrap();
    tx.set(&existing, "name", "v2").unwrap();
    let changes = tx.commit().unwrap().changes.unwrap();

    let tracked = changes.get(&existing).unwrap();
    assert_eq!(tracked.kind, ChangeKind::Updated);
    let change = tracked.change_for("name").unwrap();
    assert_eq!(change.old_value, Value::from("v0"));
    assert_eq!(change.new_value, Value::from("v2"));
    assert_eq!(ctx.audit.len(), 1);
}

#[test]
fn test_update_then_delete_audits_deletion_only() {
    let ctx = TestContext::new();
    let existing = entity("Customer", 1);
    ctx.seed(&existing, "Ann");

    let mut tx = ctx.coordinator.begin("clerk");
    tx.set(&existing, "name", "Bob").unwrap();
    tx.delete(&existing).unwrap();
    tx.commit().unwrap();

    let rows = ctx.audit.entries();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_deleted());
    assert!(!ctx.store().contains(&existing).unwrap());
}

#[test]
fn test_rollback_and_drop_leave_no_trace() {
    let ctx = TestContext::new();

    let mut tx = ctx.coordinator.begin("clerk");
    let first = tx.create("Customer", named("Ann")).unwrap();
    tx.pre_commit().unwrap();
    tx.rollback();

    let second = {
        let mut tx = ctx.coordinator.begin("clerk");
        tx.create("Customer", named("Bob")).unwrap()
    };

    assert!(!ctx.store().contains(&first).unwrap());
    assert!(!ctx.store().contains(&second).unwrap());
    assert!(ctx.audit.is_empty());
    assert!(ctx.outbox.is_empty());
    assert_eq!(ctx.gate.rollbacks.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.metrics.transactions_rolled_back(), 2);
}

#[test]
fn test_interaction_runs_sequential_transactions() {
    let ctx = TestContext::new();
    let mut interaction = ctx.coordinator.interaction("clerk");

    let mut tx = interaction.begin();
    let created = tx.create("Customer", named("Ann")).unwrap();
    tx.commit().unwrap();

    let mut tx = interaction.begin();
    tx.set(&created, "name", "Anne").unwrap();
    tx.commit().unwrap();

    let (entries, more) = ctx.outbox.scan_batch(0, 10).unwrap();
    assert!(!more);
    assert_eq!(entries.len(), 2);
    assert_eq!(
        entries[0].transaction_id.interaction,
        entries[1].transaction_id.interaction
    );
    assert_eq!(entries[0].transaction_id.sequence, 0);
    assert_eq!(entries[1].transaction_id.sequence, 1);
    assert_eq!(entries[1].changes.count(ChangeKind::Updated), 1);
}

#[test]
fn test_ignored_type_is_written_but_not_published() {
    let policy = TrackingPolicy::new().ignore_type("Session");
    let ctx = TestContext::build(Gate::default(), policy);

    let mut tx = ctx.coordinator.begin("clerk");
    let session = tx.create("Session", named("s1")).unwrap();
    let outcome = tx.commit().unwrap();

    assert!(outcome.changes.is_none());
    assert!(ctx.store().contains(&session).unwrap());
    assert!(ctx.audit.is_empty());
}

#[test]
fn test_metrics_follow_commits() {
    let ctx = TestContext::new();
    let existing = entity("Customer", 1);
    ctx.seed(&existing, "Ann");

    let mut tx = ctx.coordinator.begin("clerk");
    tx.create("Order", named("o1")).unwrap();
    tx.set(&existing, "name", "Bob").unwrap();
    tx.commit().unwrap();

    assert_eq!(ctx.metrics.transactions_begun(), 1);
    assert_eq!(ctx.metrics.transactions_committed(), 1);
    assert_eq!(ctx.metrics.entities_created(), 1);
    assert_eq!(ctx.metrics.entities_updated(), 1);
    assert_eq!(ctx.metrics.property_changes(), 1);
    assert_eq!(ctx.metrics.listener_invocations().get("audit"), Some(&1));
    assert!(ctx
        .metrics
        .to_prometheus()
        .contains("unitwork_transactions_committed_total 1"));
}

#[test]
fn test_non_finite_float_is_rejected_before_commit() {
    let ctx = TestContext::new();
    let sensor = entity("Sensor", 1);
    ctx.store()
        .put(
            &sensor,
            &Record::from_fields([("reading", Value::Float64(1.0))]).unwrap(),
        )
        .unwrap();

    let mut tx = ctx.coordinator.begin("clerk");
    assert!(matches!(
        tx.set(&sensor, "reading", f64::INFINITY),
        Err(Error::Serialization(_))
    ));
    let outcome = tx.commit().unwrap();

    assert!(outcome.changes.is_none());
    assert_eq!(
        ctx.store().get(&sensor).unwrap().unwrap().get("reading").unwrap(),
        Value::Float64(1.0)
    );
    assert!(ctx.outbox.is_empty());
    assert!(ctx.outbox.scan_batch(0, 10).unwrap().0.is_empty());
}

#[test]
fn test_observed_non_finite_float_fails_publication() {
    let ctx = TestContext::new();
    let sensor = entity("Sensor", 1);

    let mut tx = ctx.coordinator.begin("clerk");
    tx.observe(EntityEvent::set(sensor, "reading", 1.0, f64::NAN))
        .unwrap();

    match tx.commit() {
        Err(Error::Publish(e)) => assert_eq!(e.listener, "outbox"),
        other => panic!("expected publish error, got {:?}", other),
    }
    assert!(ctx.outbox.is_empty());
    assert!(ctx.audit.is_empty());
}

#[test]
fn test_outbox_lsns_follow_commit_order() {
    let ctx = TestContext::new();

    let mut first = ctx.coordinator.begin("clerk");
    let early = first.create("Customer", named("Ann")).unwrap();
    first.pre_commit().unwrap();

    let mut second = ctx.coordinator.begin("clerk");
    let late = second.create("Customer", named("Bob")).unwrap();
    let outcome = second.commit().unwrap();
    assert_eq!(outcome.outbox_lsns, vec![1]);

    let (seen, _) = ctx.outbox.scan_batch(1, 10).unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].changes.get(&late).is_some());
    let cursor = seen[0].lsn + 1;

    let outcome = first.commit().unwrap();
    assert_eq!(outcome.outbox_lsns, vec![2]);

    let (next, more) = ctx.outbox.scan_batch(cursor, 10).unwrap();
    assert!(!more);
    assert_eq!(next.len(), 1);
    assert!(next[0].changes.get(&early).is_some());
    assert_eq!(ctx.outbox.len(), 2);
}

#[test]
fn test_concurrent_transactions_keep_side_effects_apart() {
    let ctx = TestContext::new();
    let mut subscriber = ctx.events.subscribe();
    let coordinator = &ctx.coordinator;

    std::thread::scope(|scope| {
        for n in 0..8u8 {
            scope.spawn(move || {
                let mut tx = coordinator.begin(format!("worker-{}", n));
                tx.create_with_id(entity("Customer", n), named("x")).unwrap();
                if n % 2 == 0 {
                    tx.commit().unwrap();
                } else {
                    tx.pre_commit().unwrap();
                    tx.rollback();
                }
            });
        }
    });

    let committed: Vec<EntityRef> = (0..8u8)
        .filter(|n| n % 2 == 0)
        .map(|n| entity("Customer", n))
        .collect();

    let rows = ctx.audit.entries();
    assert_eq!(rows.len(), committed.len());
    assert!(rows.iter().all(|row| committed.contains(&row.entity)));

    let mut events = Vec::new();
    while let Some(event) = subscriber.try_recv() {
        events.push(event.entity);
    }
    assert_eq!(events.len(), committed.len());
    assert!(events.iter().all(|e| committed.contains(e)));

    let (entries, _) = ctx.outbox.scan_batch(0, 100).unwrap();
    assert_eq!(
        entries.iter().map(|e| e.lsn).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    for n in 0..8u8 {
        assert_eq!(
            ctx.store().contains(&entity("Customer", n)).unwrap(),
            n % 2 == 0
        );
    }
    assert_eq!(ctx.gate.commits.load(Ordering::SeqCst), 4);
    assert_eq!(ctx.gate.rollbacks.load(Ordering::SeqCst), 4);
}

//! Wiring of the store, listeners and coordinator for one CLI run.

use std::sync::Arc;

use unitwork_core::audit::{AuditListener, AuditSink, NullAuditSink, TracingAuditSink};
use unitwork_core::events::DomainEventBus;
use unitwork_core::outbox::Outbox;
use unitwork_core::proto::{ChangeSet, TransactionId};
use unitwork_core::publish::ListenerRegistry;
use unitwork_core::{EntityStore, Error, SharedMetricsRegistry, Transaction, TransactionCoordinator};

use crate::config::{AuditSinkKind, RuntimeConfig};
use crate::script::{to_record, to_value, Aliases, Operation, Script, ScriptTransaction};

/// What happened to one script transaction.
#[derive(Debug)]
pub struct TransactionReport {
    /// Transaction id.
    pub transaction_id: TransactionId,
    /// Published change set, if anything tracked changed.
    pub changes: Option<Arc<ChangeSet>>,
    /// Whether the transaction committed.
    pub committed: bool,
    /// Failure that rolled the transaction back, if any.
    pub error: Option<String>,
}

/// A coordinator with the configured listeners attached.
pub struct Pipeline {
    coordinator: TransactionCoordinator,
    audit: Arc<AuditListener<Box<dyn AuditSink>>>,
}

impl Pipeline {
    /// Open the store and register listeners in order: audit, outbox, events.
    pub fn open(
        config: &RuntimeConfig,
        events: Arc<DomainEventBus>,
        metrics: SharedMetricsRegistry,
    ) -> Result<Self, Error> {
        let store = Arc::new(EntityStore::open(config.storage_config())?);

        let sink: Box<dyn AuditSink> = match config.audit_sink {
            AuditSinkKind::Tracing => Box::new(TracingAuditSink),
            AuditSinkKind::Null => Box::new(NullAuditSink),
        };
        let audit = Arc::new(AuditListener::new(sink));

        let mut registry = ListenerRegistry::new().register(audit.clone())?;
        if config.outbox {
            registry = registry.register(Arc::new(Outbox::open(&store)?))?;
        }
        let registry = registry.register(events)?;

        tracing::info!(
            listeners = ?registry.names(),
            temporary = config.data_path.is_none(),
            "pipeline ready"
        );

        let coordinator = TransactionCoordinator::new(store, Arc::new(registry))
            .with_policy(config.tracking_policy())
            .with_metrics(metrics);

        Ok(Self { coordinator, audit })
    }

    /// Run every transaction of `script` in order.
    ///
    /// A failing transaction is rolled back and reported; the run continues
    /// with the next one.
    pub fn run(&self, script: &Script) -> Result<Vec<TransactionReport>, Error> {
        let mut aliases = Aliases::default();
        let mut reports = Vec::with_capacity(script.transactions.len());

        for planned in &script.transactions {
            let mut tx = self.coordinator.begin(planned.user.as_str());
            let transaction_id = tx.id();

            if let Err(e) = apply_operations(&mut tx, planned, &mut aliases) {
                tracing::warn!(transaction = %transaction_id, error = %e, "operation failed");
                tx.rollback();
                reports.push(TransactionReport {
                    transaction_id,
                    changes: None,
                    committed: false,
                    error: Some(e),
                });
                continue;
            }

            if planned.rollback {
                reports.push(publish_then_roll_back(tx));
                continue;
            }

            match tx.commit() {
                Ok(outcome) => reports.push(TransactionReport {
                    transaction_id,
                    changes: outcome.changes,
                    committed: true,
                    error: None,
                }),
                Err(e) => {
                    tracing::warn!(transaction = %transaction_id, error = %e, "commit failed");
                    reports.push(TransactionReport {
                        transaction_id,
                        changes: None,
                        committed: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(reports)
    }

    /// Flush the store and the audit sink.
    pub fn flush(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.coordinator.store().flush()?;
        self.audit.sink().flush()?;
        Ok(())
    }
}

/// Publish the change set so listeners see it, then roll back.
///
/// A publication failure is reported rather than mistaken for an empty
/// transaction.
fn publish_then_roll_back(mut tx: Transaction<'_>) -> TransactionReport {
    let transaction_id = tx.id();
    let (changes, error) = match tx.pre_commit() {
        Ok(changes) => (changes, None),
        Err(e) => {
            tracing::warn!(transaction = %transaction_id, error = %e, "publication failed");
            (None, Some(e.to_string()))
        }
    };
    tx.rollback();
    TransactionReport {
        transaction_id,
        changes,
        committed: false,
        error,
    }
}

/// Apply a script transaction's operations.
///
/// Unreadable properties and duplicate lifecycle events are logged and
/// skipped; any other failure aborts the transaction.
fn apply_operations(
    tx: &mut Transaction<'_>,
    planned: &ScriptTransaction,
    aliases: &mut Aliases,
) -> Result<(), String> {
    for op in &planned.operations {
        let result = match op {
            Operation::Create {
                entity_type,
                alias,
                fields,
            } => {
                let record = to_record(fields).map_err(|e| e.to_string())?;
                tx.create(entity_type.as_str(), record).map(|entity| {
                    if let Some(alias) = alias {
                        aliases.bind(alias.as_str(), entity);
                    }
                })
            }
            Operation::Set {
                target,
                property,
                value,
            } => {
                let entity = aliases.resolve(target).map_err(|e| e.to_string())?;
                let value = to_value(property, value).map_err(|e| e.to_string())?;
                tx.set(&entity, property.as_str(), value)
            }
            Operation::Delete { target } => {
                let entity = aliases.resolve(target).map_err(|e| e.to_string())?;
                tx.delete(&entity)
            }
        };

        match result {
            Ok(()) => {}
            Err(Error::Collect(e)) => {
                tracing::warn!(transaction = %tx.id(), error = %e, "change not collected");
            }
            Err(e) => return Err(e.to_string()),
        }
    }
    Ok(())
}

//! Per-transaction change accumulation.

use std::collections::HashMap;
use std::sync::Arc;

use unitwork_proto::{
    ChangeSet, ChangeSetHeader, EntityRef, PropertyChange, PropertyFault, TrackedEntity, Value,
};

use super::event::{EntityEvent, EntityObserver, Observed};
use super::policy::TrackingPolicy;
use crate::error::CollectError;

/// Whether the entity existed before the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    New,
    Existing,
}

#[derive(Debug, Clone)]
enum Delta {
    /// First-seen old value and last-seen new value.
    Tracked { old: Value, new: Value },
    /// A read failed; the net change of this property is unknown.
    Faulted { reason: String },
}

#[derive(Debug, Clone)]
struct PropertyEntry {
    property: String,
    delta: Delta,
}

#[derive(Debug, Clone)]
struct EntityEntry {
    entity: EntityRef,
    origin: Origin,
    deleted: bool,
    properties: Vec<PropertyEntry>,
}

impl EntityEntry {
    fn new(entity: EntityRef, origin: Origin) -> Self {
        Self {
            entity,
            origin,
            deleted: false,
            properties: Vec::new(),
        }
    }

    fn property_mut(&mut self, property: &str) -> Option<&mut PropertyEntry> {
        self.properties.iter_mut().find(|p| p.property == property)
    }
}

/// Accumulates entity lifecycle events for one transaction.
///
/// Entities are kept in order of first observation. Repeated writes to the
/// same property collapse to the first old value and the last new value, so
/// the built change set reports the net effect of the whole transaction.
#[derive(Debug, Clone)]
pub struct ChangeCollector {
    policy: Arc<TrackingPolicy>,
    entries: Vec<EntityEntry>,
    index: HashMap<EntityRef, usize>,
    events_observed: u64,
}

impl Default for ChangeCollector {
    fn default() -> Self {
        Self::new(Arc::new(TrackingPolicy::default()))
    }
}

impl ChangeCollector {
    /// Create an empty collector governed by `policy`.
    pub fn new(policy: Arc<TrackingPolicy>) -> Self {
        Self {
            policy,
            entries: Vec::new(),
            index: HashMap::new(),
            events_observed: 0,
        }
    }

    /// Number of distinct entities seen so far, including ones that will net out.
    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether no event has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of events accepted by the collector.
    pub fn events_observed(&self) -> u64 {
        self.events_observed
    }

    /// Faults recorded so far for entities that still count as updated.
    pub fn faults(&self) -> Vec<PropertyFault> {
        self.entries
            .iter()
            .filter(|e| e.origin == Origin::Existing && !e.deleted)
            .flat_map(|e| {
                e.properties.iter().filter_map(move |p| match &p.delta {
                    Delta::Faulted { reason } => Some(PropertyFault {
                        entity: e.entity.clone(),
                        property: p.property.clone(),
                        reason: reason.clone(),
                    }),
                    Delta::Tracked { .. } => None,
                })
            })
            .collect()
    }

    /// Build the net change set from everything observed so far.
    ///
    /// Does not modify the collector; calling it twice yields equal sets.
    pub fn build(&self, header: ChangeSetHeader) -> ChangeSet {
        let mut entities = Vec::with_capacity(self.entries.len());

        for entry in &self.entries {
            match (entry.origin, entry.deleted) {
                (Origin::New, false) => entities.push(TrackedEntity::created(entry.entity.clone())),
                (Origin::New, true) => {}
                (Origin::Existing, true) => {
                    entities.push(TrackedEntity::deleted(entry.entity.clone()))
                }
                (Origin::Existing, false) => {
                    let changes: Vec<PropertyChange> = entry
                        .properties
                        .iter()
                        .filter_map(|p| match &p.delta {
                            Delta::Tracked { old, new } if old != new => Some(
                                PropertyChange::new(p.property.clone(), old.clone(), new.clone()),
                            ),
                            _ => None,
                        })
                        .collect();
                    if !changes.is_empty() {
                        entities.push(TrackedEntity::updated(entry.entity.clone(), changes));
                    }
                }
            }
        }

        ChangeSet::new(header, entities, self.faults())
    }

    /// Position of the entity's entry, enlisting it with `origin` on first sight.
    fn entry_index(&mut self, entity: EntityRef, origin: Origin) -> usize {
        match self.index.get(&entity) {
            Some(&idx) => idx,
            None => {
                let idx = self.entries.len();
                self.index.insert(entity.clone(), idx);
                self.entries.push(EntityEntry::new(entity, origin));
                idx
            }
        }
    }
}

impl EntityObserver for ChangeCollector {
    fn on_created(&mut self, entity: EntityRef) -> Result<(), CollectError> {
        if !self.policy.tracks_type(&entity.entity_type) {
            return Ok(());
        }

        if let Some(&idx) = self.index.get(&entity) {
            let entry = &self.entries[idx];
            return Err(if entry.deleted {
                CollectError::AlreadyDeleted(entity)
            } else {
                CollectError::AlreadyCreated(entity)
            });
        }

        tracing::debug!(entity = %entity, "collected create");
        self.entry_index(entity, Origin::New);
        self.events_observed += 1;
        Ok(())
    }

    fn on_property_set(
        &mut self,
        entity: EntityRef,
        property: String,
        old: Observed,
        new: Observed,
    ) -> Result<(), CollectError> {
        if !self.policy.tracks_property(&entity.entity_type, &property) {
            return Ok(());
        }

        let idx = self.entry_index(entity.clone(), Origin::Existing);
        if self.entries[idx].deleted {
            return Err(CollectError::AlreadyDeleted(entity));
        }
        self.events_observed += 1;

        let entry = &mut self.entries[idx];
        // Values of entities created in this transaction are not deltas.
        if entry.origin == Origin::New {
            return Ok(());
        }

        let fault = match entry.property_mut(&property) {
            None => {
                let (delta, fault) = match (old, new) {
                    (Ok(old), Ok(new)) => (Delta::Tracked { old, new }, None),
                    (Err(fault), _) | (_, Err(fault)) => (
                        Delta::Faulted {
                            reason: fault.reason.clone(),
                        },
                        Some(fault.reason),
                    ),
                };
                entry.properties.push(PropertyEntry {
                    property: property.clone(),
                    delta,
                });
                fault
            }
            // Already reported; the property stays excluded.
            Some(PropertyEntry {
                delta: Delta::Faulted { .. },
                ..
            }) => None,
            // An intermediate old value cannot change the net result.
            Some(existing) => match new {
                Ok(value) => {
                    if let Delta::Tracked { new: last, .. } = &mut existing.delta {
                        *last = value;
                    }
                    None
                }
                Err(fault) => {
                    existing.delta = Delta::Faulted {
                        reason: fault.reason.clone(),
                    };
                    Some(fault.reason)
                }
            },
        };

        match fault {
            Some(reason) => {
                tracing::warn!(entity = %entity, property = %property, reason = %reason, "unreadable property");
                Err(CollectError::UnreadableProperty {
                    entity,
                    property,
                    reason,
                })
            }
            None => {
                tracing::debug!(entity = %entity, property = %property, "collected property write");
                Ok(())
            }
        }
    }

    fn on_deleted(&mut self, entity: EntityRef) -> Result<(), CollectError> {
        if !self.policy.tracks_type(&entity.entity_type) {
            return Ok(());
        }

        let idx = self.entry_index(entity.clone(), Origin::Existing);
        if self.entries[idx].deleted {
            return Err(CollectError::AlreadyDeleted(entity));
        }
        self.entries[idx].deleted = true;
        self.events_observed += 1;

        tracing::debug!(entity = %entity, "collected delete");
        Ok(())
    }
}

/// Build a change set from a sequence of events in one pass.
///
/// Returns the change set together with every recoverable error raised while
/// collecting; an error never removes the other events' effects.
pub fn collect<I>(
    events: I,
    policy: Arc<TrackingPolicy>,
    header: ChangeSetHeader,
) -> (ChangeSet, Vec<CollectError>)
where
    I: IntoIterator<Item = EntityEvent>,
{
    let mut collector = ChangeCollector::new(policy);
    let errors = events
        .into_iter()
        .filter_map(|event| collector.observe(event).err())
        .collect();
    (collector.build(header), errors)
}

//! Which entities and properties take part in change tracking.

use std::collections::HashSet;

/// Per-type and per-property tracking switches.
///
/// Domain types that opt out of auditing/publishing, and properties such as
/// optimistic-lock version counters, are excluded here. Excluded events are
/// ignored by the collector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingPolicy {
    ignored_types: HashSet<String>,
    ignored_properties: HashSet<(String, String)>,
    ignored_everywhere: HashSet<String>,
}

impl TrackingPolicy {
    /// A policy that tracks everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop tracking an entity type.
    pub fn ignore_type(mut self, entity_type: impl Into<String>) -> Self {
        self.ignored_types.insert(entity_type.into());
        self
    }

    /// Stop tracking one property of one entity type.
    pub fn ignore_property(
        mut self,
        entity_type: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        self.ignored_properties
            .insert((entity_type.into(), property.into()));
        self
    }

    /// Stop tracking a property name on every entity type.
    pub fn ignore_property_everywhere(mut self, property: impl Into<String>) -> Self {
        self.ignored_everywhere.insert(property.into());
        self
    }

    /// Whether events for this entity type are collected.
    pub fn tracks_type(&self, entity_type: &str) -> bool {
        !self.ignored_types.contains(entity_type)
    }

    /// Whether writes to this property are collected.
    pub fn tracks_property(&self, entity_type: &str, property: &str) -> bool {
        self.tracks_type(entity_type)
            && !self.ignored_everywhere.contains(property)
            && !self
                .ignored_properties
                .contains(&(entity_type.to_string(), property.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tracks_everything() {
        let policy = TrackingPolicy::new();
        assert!(policy.tracks_type("Customer"));
        assert!(policy.tracks_property("Customer", "name"));
    }

    #[test]
    fn test_exclusions() {
        let policy = TrackingPolicy::new()
            .ignore_type("SessionLog")
            .ignore_property("Customer", "lastSeen")
            .ignore_property_everywhere("version");

        assert!(!policy.tracks_type("SessionLog"));
        assert!(!policy.tracks_property("SessionLog", "name"));
        assert!(!policy.tracks_property("Customer", "lastSeen"));
        assert!(policy.tracks_property("Order", "lastSeen"));
        assert!(!policy.tracks_property("Order", "version"));
        assert!(policy.tracks_property("Customer", "name"));
    }
}

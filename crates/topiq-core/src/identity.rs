//! # Identity Store
//!
//! Locator ↔ construct mapping with uniqueness enforcement across the
//! three identifier namespaces, plus merge-time identifier migration.
//!
//! Uniqueness is global to the map: one locator names at most one
//! construct, regardless of namespace.

use crate::model::IdentifierSets;
use crate::types::{ConstructId, EngineError, IdentifierKind, Locator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Locator ↔ construct mapping for one topic map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityStore {
    /// Forward map; enforces global uniqueness.
    by_locator: BTreeMap<Locator, (IdentifierKind, ConstructId)>,
    /// Reverse map: every identifier a construct carries.
    of_construct: BTreeMap<ConstructId, IdentifierSets>,
}

impl IdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a locator to the construct it names, in any namespace.
    #[must_use]
    pub fn resolve(&self, locator: &Locator) -> Option<ConstructId> {
        self.by_locator.get(locator).map(|(_, id)| *id)
    }

    /// The namespace and construct a locator is registered under.
    #[must_use]
    pub fn entry(&self, locator: &Locator) -> Option<(IdentifierKind, ConstructId)> {
        self.by_locator.get(locator).copied()
    }

    /// Register a locator for a construct.
    ///
    /// Fails with `IdentityConstraint` if the locator already names a
    /// *different* construct; re-registering the same pair is a no-op.
    pub fn register(
        &mut self,
        construct: ConstructId,
        kind: IdentifierKind,
        locator: Locator,
    ) -> Result<(), EngineError> {
        if let Some((_, existing)) = self.by_locator.get(&locator) {
            if *existing != construct {
                return Err(EngineError::IdentityConstraint {
                    locator,
                    existing: *existing,
                    candidate: construct,
                });
            }
            return Ok(());
        }
        self.by_locator.insert(locator.clone(), (kind, construct));
        let sets = self.of_construct.entry(construct).or_default();
        match kind {
            IdentifierKind::SubjectIdentifier => sets.subject_identifiers.insert(locator),
            IdentifierKind::SubjectLocator => sets.subject_locators.insert(locator),
            IdentifierKind::ItemIdentifier => sets.item_identifiers.insert(locator),
        };
        Ok(())
    }

    /// Drop one locator from a construct. Returns whether it was present.
    pub fn unregister(
        &mut self,
        construct: ConstructId,
        kind: IdentifierKind,
        locator: &Locator,
    ) -> bool {
        match self.by_locator.get(locator) {
            Some((_, id)) if *id == construct => {}
            _ => return false,
        }
        self.by_locator.remove(locator);
        if let Some(sets) = self.of_construct.get_mut(&construct) {
            match kind {
                IdentifierKind::SubjectIdentifier => sets.subject_identifiers.remove(locator),
                IdentifierKind::SubjectLocator => sets.subject_locators.remove(locator),
                IdentifierKind::ItemIdentifier => sets.item_identifiers.remove(locator),
            };
            if sets.is_empty() {
                self.of_construct.remove(&construct);
            }
        }
        true
    }

    /// All identifiers carried by a construct.
    #[must_use]
    pub fn identifiers_of(&self, construct: ConstructId) -> IdentifierSets {
        self.of_construct.get(&construct).cloned().unwrap_or_default()
    }

    /// Drop every identifier of a construct (construct removal).
    pub fn remove_construct(&mut self, construct: ConstructId) {
        if let Some(sets) = self.of_construct.remove(&construct) {
            for (_, locator) in sets.iter() {
                self.by_locator.remove(locator);
            }
        }
    }

    /// Move every identifier of `doomed` onto `keep` (merge).
    ///
    /// Never collides: each migrated locator named `doomed`, so it cannot
    /// simultaneously name a third construct.
    pub fn migrate(&mut self, doomed: ConstructId, keep: ConstructId) {
        if let Some(sets) = self.of_construct.remove(&doomed) {
            let target = self.of_construct.entry(keep).or_default();
            for (kind, locator) in sets.iter() {
                self.by_locator
                    .insert(locator.clone(), (kind, keep));
                match kind {
                    IdentifierKind::SubjectIdentifier => {
                        target.subject_identifiers.insert(locator.clone())
                    }
                    IdentifierKind::SubjectLocator => {
                        target.subject_locators.insert(locator.clone())
                    }
                    IdentifierKind::ItemIdentifier => {
                        target.item_identifiers.insert(locator.clone())
                    }
                };
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(s: &str) -> Locator {
        Locator::new(s).expect("locator")
    }

    #[test]
    fn register_and_resolve() {
        let mut store = IdentityStore::new();
        store
            .register(ConstructId(1), IdentifierKind::SubjectIdentifier, loc("u:1"))
            .expect("register");

        assert_eq!(store.resolve(&loc("u:1")), Some(ConstructId(1)));
        assert_eq!(store.resolve(&loc("u:2")), None);
    }

    #[test]
    fn collision_rejected_without_partial_mutation() {
        let mut store = IdentityStore::new();
        store
            .register(ConstructId(1), IdentifierKind::SubjectIdentifier, loc("u:1"))
            .expect("register");

        let err = store
            .register(ConstructId(2), IdentifierKind::ItemIdentifier, loc("u:1"))
            .expect_err("collision");
        assert!(matches!(err, EngineError::IdentityConstraint { .. }));

        // Still resolves to the original construct, and construct 2 gained nothing.
        assert_eq!(store.resolve(&loc("u:1")), Some(ConstructId(1)));
        assert!(store.identifiers_of(ConstructId(2)).is_empty());
    }

    #[test]
    fn reregistering_same_pair_is_noop() {
        let mut store = IdentityStore::new();
        store
            .register(ConstructId(1), IdentifierKind::SubjectIdentifier, loc("u:1"))
            .expect("register");
        store
            .register(ConstructId(1), IdentifierKind::SubjectIdentifier, loc("u:1"))
            .expect("idempotent");
        assert_eq!(
            store.identifiers_of(ConstructId(1)).subject_identifiers.len(),
            1
        );
    }

    #[test]
    fn migrate_moves_all_namespaces() {
        let mut store = IdentityStore::new();
        store
            .register(ConstructId(1), IdentifierKind::SubjectIdentifier, loc("u:si"))
            .expect("register");
        store
            .register(ConstructId(1), IdentifierKind::SubjectLocator, loc("u:sl"))
            .expect("register");
        store
            .register(ConstructId(2), IdentifierKind::ItemIdentifier, loc("u:ii"))
            .expect("register");

        store.migrate(ConstructId(1), ConstructId(2));

        assert_eq!(store.resolve(&loc("u:si")), Some(ConstructId(2)));
        assert_eq!(store.resolve(&loc("u:sl")), Some(ConstructId(2)));
        let sets = store.identifiers_of(ConstructId(2));
        assert_eq!(sets.subject_identifiers.len(), 1);
        assert_eq!(sets.subject_locators.len(), 1);
        assert_eq!(sets.item_identifiers.len(), 1);
        assert!(store.identifiers_of(ConstructId(1)).is_empty());
    }

    #[test]
    fn remove_construct_drops_forward_entries() {
        let mut store = IdentityStore::new();
        store
            .register(ConstructId(1), IdentifierKind::SubjectIdentifier, loc("u:1"))
            .expect("register");
        store.remove_construct(ConstructId(1));
        assert_eq!(store.resolve(&loc("u:1")), None);
    }
}

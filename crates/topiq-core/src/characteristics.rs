//! # Characteristics & Topic-Type Stores
//!
//! Adjacency for one map: topic → {names, occurrences}, association →
//! roles, name → variants, topic → roles played, plus the type-instance,
//! supertype-subtype, and type → typed-construct indexes.
//!
//! Forward and reverse directions are maintained together by the paired
//! mutators; callers never touch one side alone.

use crate::types::ConstructId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

type Adjacency = BTreeMap<ConstructId, BTreeSet<ConstructId>>;

fn adj_insert(map: &mut Adjacency, key: ConstructId, member: ConstructId) {
    map.entry(key).or_default().insert(member);
}

fn adj_remove(map: &mut Adjacency, key: ConstructId, member: ConstructId) {
    if let Some(set) = map.get_mut(&key) {
        set.remove(&member);
        if set.is_empty() {
            map.remove(&key);
        }
    }
}

fn adj_list(map: &Adjacency, key: ConstructId) -> Vec<ConstructId> {
    map.get(&key)
        .map(|set| set.iter().copied().collect())
        .unwrap_or_default()
}

/// Ownership and type adjacency for one map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacteristicsStore {
    names_of: Adjacency,
    occurrences_of: Adjacency,
    variants_of: Adjacency,
    roles_of: Adjacency,
    roles_played: Adjacency,
    /// Topic -> its type topics.
    types_of: Adjacency,
    /// Type topic -> its instances.
    instances_of: Adjacency,
    supertypes_of: Adjacency,
    subtypes_of: Adjacency,
    /// Type topic -> typed constructs (associations, roles, names, occurrences).
    typed_by: Adjacency,
}

impl CharacteristicsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // OWNERSHIP
    // =========================================================================

    pub fn add_name(&mut self, topic: ConstructId, name: ConstructId) {
        adj_insert(&mut self.names_of, topic, name);
    }

    pub fn remove_name(&mut self, topic: ConstructId, name: ConstructId) {
        adj_remove(&mut self.names_of, topic, name);
    }

    #[must_use]
    pub fn names_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        adj_list(&self.names_of, topic)
    }

    pub fn add_occurrence(&mut self, topic: ConstructId, occurrence: ConstructId) {
        adj_insert(&mut self.occurrences_of, topic, occurrence);
    }

    pub fn remove_occurrence(&mut self, topic: ConstructId, occurrence: ConstructId) {
        adj_remove(&mut self.occurrences_of, topic, occurrence);
    }

    #[must_use]
    pub fn occurrences_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        adj_list(&self.occurrences_of, topic)
    }

    pub fn add_variant(&mut self, name: ConstructId, variant: ConstructId) {
        adj_insert(&mut self.variants_of, name, variant);
    }

    pub fn remove_variant(&mut self, name: ConstructId, variant: ConstructId) {
        adj_remove(&mut self.variants_of, name, variant);
    }

    #[must_use]
    pub fn variants_of(&self, name: ConstructId) -> Vec<ConstructId> {
        adj_list(&self.variants_of, name)
    }

    pub fn add_role(&mut self, association: ConstructId, role: ConstructId, player: ConstructId) {
        adj_insert(&mut self.roles_of, association, role);
        adj_insert(&mut self.roles_played, player, role);
    }

    pub fn remove_role(&mut self, association: ConstructId, role: ConstructId, player: ConstructId) {
        adj_remove(&mut self.roles_of, association, role);
        adj_remove(&mut self.roles_played, player, role);
    }

    /// Repoint one role's player without touching the owning association.
    pub fn reassign_player(&mut self, role: ConstructId, old: ConstructId, new: ConstructId) {
        adj_remove(&mut self.roles_played, old, role);
        adj_insert(&mut self.roles_played, new, role);
    }

    #[must_use]
    pub fn roles_of(&self, association: ConstructId) -> Vec<ConstructId> {
        adj_list(&self.roles_of, association)
    }

    #[must_use]
    pub fn roles_played(&self, topic: ConstructId) -> Vec<ConstructId> {
        adj_list(&self.roles_played, topic)
    }

    // =========================================================================
    // TYPE-INSTANCE / SUPERTYPE-SUBTYPE
    // =========================================================================

    pub fn add_type(&mut self, topic: ConstructId, type_topic: ConstructId) {
        adj_insert(&mut self.types_of, topic, type_topic);
        adj_insert(&mut self.instances_of, type_topic, topic);
    }

    pub fn remove_type(&mut self, topic: ConstructId, type_topic: ConstructId) {
        adj_remove(&mut self.types_of, topic, type_topic);
        adj_remove(&mut self.instances_of, type_topic, topic);
    }

    #[must_use]
    pub fn types_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        adj_list(&self.types_of, topic)
    }

    #[must_use]
    pub fn instances_of(&self, type_topic: ConstructId) -> Vec<ConstructId> {
        adj_list(&self.instances_of, type_topic)
    }

    pub fn add_supertype(&mut self, topic: ConstructId, supertype: ConstructId) {
        adj_insert(&mut self.supertypes_of, topic, supertype);
        adj_insert(&mut self.subtypes_of, supertype, topic);
    }

    pub fn remove_supertype(&mut self, topic: ConstructId, supertype: ConstructId) {
        adj_remove(&mut self.supertypes_of, topic, supertype);
        adj_remove(&mut self.subtypes_of, supertype, topic);
    }

    #[must_use]
    pub fn supertypes_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        adj_list(&self.supertypes_of, topic)
    }

    #[must_use]
    pub fn subtypes_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        adj_list(&self.subtypes_of, topic)
    }

    // =========================================================================
    // TYPED CONSTRUCTS
    // =========================================================================

    pub fn add_typed(&mut self, type_topic: ConstructId, construct: ConstructId) {
        adj_insert(&mut self.typed_by, type_topic, construct);
    }

    pub fn remove_typed(&mut self, type_topic: ConstructId, construct: ConstructId) {
        adj_remove(&mut self.typed_by, type_topic, construct);
    }

    #[must_use]
    pub fn typed_by(&self, type_topic: ConstructId) -> Vec<ConstructId> {
        adj_list(&self.typed_by, type_topic)
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! # Base Store & Store Contracts
//!
//! Three things live here:
//!
//! - [`StoreReads`] / [`StoreView`]: the uniform read/write surface the
//!   merge engine and all engine operations are written against. The
//!   in-memory base store and the transaction overlay both implement it,
//!   so graph semantics (merge included) are defined once and hold
//!   identically inside and outside transactions.
//! - [`MemoryStore`]: the shared, mutable, unsynchronized base store —
//!   arena of construct records plus the identity, scope, reification and
//!   characteristics component stores and the revision log.
//! - [`ConstructBackend`]: the contract a persistence backend fulfils.
//!   The relational backend is an external collaborator; `MemoryStore`
//!   implements the same contract so callers can swap either in.

use crate::characteristics::CharacteristicsStore;
use crate::identity::IdentityStore;
use crate::model::{
    Association, Construct, IdentifierSets, Name, Occurrence, Role, Topic, Variant,
};
use crate::reification::ReificationStore;
use crate::revision::{Changeset, EventKind, Revision, RevisionLog};
use crate::scope::ScopeStore;
use crate::types::{
    ConstructId, ConstructKind, EngineError, IdentifierKind, Locator, RevisionId, ScopeId,
};
use crate::LiteralValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// ID ALLOCATION
// =============================================================================

/// Monotonic id allocator shared by the base store and every open
/// transaction overlay, so transactional creates get engine-global ids
/// that stay stable across commit. Ids are never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub(crate) fn next_id(&mut self) -> ConstructId {
        let id = ConstructId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }

    pub(crate) fn raw_next(&mut self) -> u64 {
        let raw = self.next;
        self.next = self.next.saturating_add(1);
        raw
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// READ SURFACE
// =============================================================================

/// Read surface over a topic map state: the base store directly, or a
/// transaction's merged view of overlay plus base.
///
/// Reads return owned values; cross-references are ids into the same
/// view. A lookup miss is `None`/empty, never an error.
pub trait StoreReads {
    fn kind(&self, id: ConstructId) -> Option<ConstructKind>;
    fn construct(&self, id: ConstructId) -> Option<Construct>;
    fn resolve(&self, locator: &Locator) -> Option<ConstructId>;
    fn identifiers_of(&self, construct: ConstructId) -> IdentifierSets;

    fn names_of(&self, topic: ConstructId) -> Vec<ConstructId>;
    fn occurrences_of(&self, topic: ConstructId) -> Vec<ConstructId>;
    fn variants_of(&self, name: ConstructId) -> Vec<ConstructId>;
    fn roles_of(&self, association: ConstructId) -> Vec<ConstructId>;
    fn roles_played(&self, topic: ConstructId) -> Vec<ConstructId>;

    fn types_of(&self, topic: ConstructId) -> Vec<ConstructId>;
    fn instances_of(&self, type_topic: ConstructId) -> Vec<ConstructId>;
    fn supertypes_of(&self, topic: ConstructId) -> Vec<ConstructId>;
    fn subtypes_of(&self, topic: ConstructId) -> Vec<ConstructId>;
    fn typed_by(&self, type_topic: ConstructId) -> Vec<ConstructId>;

    fn themes_of(&self, scope: ScopeId) -> Option<BTreeSet<ConstructId>>;
    fn scoped_by(&self, scope: ScopeId) -> Vec<ConstructId>;
    fn scopes_with_theme(&self, topic: ConstructId) -> Vec<ScopeId>;
    fn scope_lookup(&self, themes: &BTreeSet<ConstructId>) -> Option<ScopeId>;

    fn reifier_of(&self, reifiable: ConstructId) -> Option<ConstructId>;
    fn reified_by(&self, topic: ConstructId) -> Option<ConstructId>;

    fn topics(&self) -> Vec<ConstructId>;
    fn associations(&self) -> Vec<ConstructId>;

    fn contains(&self, id: ConstructId) -> bool {
        self.kind(id).is_some()
    }
}

// =============================================================================
// WRITE SURFACE
// =============================================================================

/// Full read/write surface over a topic map state.
///
/// Every mutation validates against the view it runs in; overlay
/// implementations additionally fail fast with `ConstructRemoved` when the
/// target carries a removal tombstone, before any overlay state changes.
pub trait StoreView: StoreReads {
    fn create_topic(&mut self) -> Result<ConstructId, EngineError>;
    fn create_association(
        &mut self,
        type_id: ConstructId,
        scope: ScopeId,
    ) -> Result<ConstructId, EngineError>;
    fn create_role(
        &mut self,
        association: ConstructId,
        type_id: ConstructId,
        player: ConstructId,
    ) -> Result<ConstructId, EngineError>;
    fn create_name(
        &mut self,
        topic: ConstructId,
        type_id: ConstructId,
        scope: ScopeId,
        value: String,
    ) -> Result<ConstructId, EngineError>;
    fn create_occurrence(
        &mut self,
        topic: ConstructId,
        type_id: ConstructId,
        scope: ScopeId,
        value: LiteralValue,
    ) -> Result<ConstructId, EngineError>;
    fn create_variant(
        &mut self,
        name: ConstructId,
        scope: ScopeId,
        value: LiteralValue,
    ) -> Result<ConstructId, EngineError>;

    fn add_identifier(
        &mut self,
        construct: ConstructId,
        kind: IdentifierKind,
        locator: Locator,
    ) -> Result<(), EngineError>;
    fn remove_identifier(
        &mut self,
        construct: ConstructId,
        kind: IdentifierKind,
        locator: &Locator,
    ) -> Result<(), EngineError>;

    fn add_type(&mut self, topic: ConstructId, type_topic: ConstructId)
        -> Result<(), EngineError>;
    fn remove_type(
        &mut self,
        topic: ConstructId,
        type_topic: ConstructId,
    ) -> Result<(), EngineError>;
    fn add_supertype(
        &mut self,
        topic: ConstructId,
        supertype: ConstructId,
    ) -> Result<(), EngineError>;
    fn remove_supertype(
        &mut self,
        topic: ConstructId,
        supertype: ConstructId,
    ) -> Result<(), EngineError>;

    fn set_type(
        &mut self,
        construct: ConstructId,
        type_topic: ConstructId,
    ) -> Result<(), EngineError>;
    fn set_scope(&mut self, construct: ConstructId, scope: ScopeId) -> Result<(), EngineError>;
    fn set_name_value(&mut self, name: ConstructId, value: String) -> Result<(), EngineError>;
    fn set_literal(
        &mut self,
        construct: ConstructId,
        value: LiteralValue,
    ) -> Result<(), EngineError>;
    fn set_player(&mut self, role: ConstructId, player: ConstructId) -> Result<(), EngineError>;
    fn set_reifier(
        &mut self,
        construct: ConstructId,
        reifier: Option<ConstructId>,
    ) -> Result<(), EngineError>;
    fn reparent(
        &mut self,
        construct: ConstructId,
        new_parent: ConstructId,
    ) -> Result<(), EngineError>;

    fn remove_construct(&mut self, id: ConstructId) -> Result<(), EngineError>;

    fn scope_for(&mut self, themes: &BTreeSet<ConstructId>) -> Result<ScopeId, EngineError>;
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// The in-memory base store for one topic map.
///
/// Shared, mutable, single-process state with no internal locking; direct
/// concurrent access is unsafe (see the concurrent wrapper in `index`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStore {
    base_locator: Locator,
    constructs: BTreeMap<ConstructId, Construct>,
    pub(crate) identity: IdentityStore,
    pub(crate) scopes: ScopeStore,
    pub(crate) reification: ReificationStore,
    pub(crate) characteristics: CharacteristicsStore,
    pub(crate) revisions: RevisionLog,
}

impl MemoryStore {
    /// Create an empty store for a map identified by `base_locator`.
    #[must_use]
    pub fn new(base_locator: Locator) -> Self {
        Self {
            base_locator,
            constructs: BTreeMap::new(),
            identity: IdentityStore::new(),
            scopes: ScopeStore::new(),
            reification: ReificationStore::new(),
            characteristics: CharacteristicsStore::new(),
            revisions: RevisionLog::new(),
        }
    }

    /// The base locator identifying this map.
    #[must_use]
    pub fn base_locator(&self) -> &Locator {
        &self.base_locator
    }

    /// All construct records in id order.
    pub fn records(&self) -> impl Iterator<Item = &Construct> {
        self.constructs.values()
    }

    /// Number of constructs in the arena.
    #[must_use]
    pub fn construct_count(&self) -> usize {
        self.constructs.len()
    }

    /// The committed revision log of this map.
    #[must_use]
    pub fn revision_log(&self) -> &RevisionLog {
        &self.revisions
    }

    fn record(&self, id: ConstructId) -> Option<&Construct> {
        self.constructs.get(&id)
    }

    fn require_topic(&self, id: ConstructId, what: &str) -> Result<(), EngineError> {
        match self.record(id) {
            Some(Construct::Topic(_)) => Ok(()),
            Some(_) => Err(EngineError::ModelConstraint(format!(
                "{what} {id:?} is not a topic"
            ))),
            None => Err(EngineError::ModelConstraint(format!(
                "{what} {id:?} does not exist"
            ))),
        }
    }

    fn require_scope(&self, scope: ScopeId) -> Result<(), EngineError> {
        if self.scopes.contains(scope) {
            Ok(())
        } else {
            Err(EngineError::ModelConstraint(format!(
                "scope {scope:?} is not interned"
            )))
        }
    }

    /// Validate every reference a record carries against the current state.
    fn validate_record(&self, record: &Construct) -> Result<(), EngineError> {
        match record {
            Construct::Topic(_) => Ok(()),
            Construct::Association(a) => {
                self.require_topic(a.type_id, "association type")?;
                self.require_scope(a.scope)
            }
            Construct::Role(r) => {
                match self.record(r.parent) {
                    Some(Construct::Association(_)) => {}
                    _ => {
                        return Err(EngineError::ModelConstraint(format!(
                            "role parent {:?} is not an association",
                            r.parent
                        )));
                    }
                }
                self.require_topic(r.type_id, "role type")?;
                self.require_topic(r.player, "role player")
            }
            Construct::Name(n) => {
                self.require_topic(n.parent, "name parent")?;
                self.require_topic(n.type_id, "name type")?;
                self.require_scope(n.scope)
            }
            Construct::Occurrence(o) => {
                self.require_topic(o.parent, "occurrence parent")?;
                self.require_topic(o.type_id, "occurrence type")?;
                self.require_scope(o.scope)
            }
            Construct::Variant(v) => {
                match self.record(v.parent) {
                    Some(Construct::Name(_)) => {}
                    _ => {
                        return Err(EngineError::ModelConstraint(format!(
                            "variant parent {:?} is not a name",
                            v.parent
                        )));
                    }
                }
                self.require_scope(v.scope)
            }
        }
    }

    /// Wire a record into the component-store indexes.
    fn wire(&mut self, record: &Construct) {
        match record {
            Construct::Topic(_) => {}
            Construct::Association(a) => {
                self.characteristics.add_typed(a.type_id, a.id);
                self.scopes.add_scoped(a.scope, a.id);
            }
            Construct::Role(r) => {
                self.characteristics.add_role(r.parent, r.id, r.player);
                self.characteristics.add_typed(r.type_id, r.id);
            }
            Construct::Name(n) => {
                self.characteristics.add_name(n.parent, n.id);
                self.characteristics.add_typed(n.type_id, n.id);
                self.scopes.add_scoped(n.scope, n.id);
            }
            Construct::Occurrence(o) => {
                self.characteristics.add_occurrence(o.parent, o.id);
                self.characteristics.add_typed(o.type_id, o.id);
                self.scopes.add_scoped(o.scope, o.id);
            }
            Construct::Variant(v) => {
                self.characteristics.add_variant(v.parent, v.id);
                self.scopes.add_scoped(v.scope, v.id);
            }
        }
    }

    /// Unwire a record from the component-store indexes.
    fn unwire(&mut self, record: &Construct) {
        match record {
            Construct::Topic(_) => {}
            Construct::Association(a) => {
                self.characteristics.remove_typed(a.type_id, a.id);
                self.scopes.remove_scoped(a.scope, a.id);
            }
            Construct::Role(r) => {
                self.characteristics.remove_role(r.parent, r.id, r.player);
                self.characteristics.remove_typed(r.type_id, r.id);
            }
            Construct::Name(n) => {
                self.characteristics.remove_name(n.parent, n.id);
                self.characteristics.remove_typed(n.type_id, n.id);
                self.scopes.remove_scoped(n.scope, n.id);
            }
            Construct::Occurrence(o) => {
                self.characteristics.remove_occurrence(o.parent, o.id);
                self.characteristics.remove_typed(o.type_id, o.id);
                self.scopes.remove_scoped(o.scope, o.id);
            }
            Construct::Variant(v) => {
                self.characteristics.remove_variant(v.parent, v.id);
                self.scopes.remove_scoped(v.scope, v.id);
            }
        }
    }

    /// Insert a new record, validating references and wiring indexes.
    pub(crate) fn insert_record(&mut self, record: Construct) -> Result<(), EngineError> {
        let id = record.id();
        if self.constructs.contains_key(&id) {
            return Err(EngineError::ModelConstraint(format!(
                "construct {id:?} already exists"
            )));
        }
        self.validate_record(&record)?;
        self.wire(&record);
        self.constructs.insert(id, record);
        Ok(())
    }

    /// Replace an existing record, rewiring indexes for changed references.
    pub(crate) fn replace_record(&mut self, record: Construct) -> Result<(), EngineError> {
        let id = record.id();
        let Some(old) = self.constructs.get(&id).cloned() else {
            return Err(EngineError::ModelConstraint(format!(
                "construct {id:?} does not exist"
            )));
        };
        if old.kind() != record.kind() {
            return Err(EngineError::ModelConstraint(format!(
                "construct {id:?} cannot change kind"
            )));
        }
        self.validate_record(&record)?;
        self.unwire(&old);
        self.wire(&record);
        self.constructs.insert(id, record);
        Ok(())
    }

    /// Remove a record and its index entries without constraint checks.
    ///
    /// Used by merge and commit application where the caller has already
    /// repointed or removed every reference. Removing an absent id is a
    /// no-op so overlapping removals stay idempotent.
    pub(crate) fn remove_record_forced(&mut self, id: ConstructId) {
        let Some(record) = self.constructs.remove(&id) else {
            return;
        };
        self.unwire(&record);
        self.identity.remove_construct(id);
        self.reification.clear_by_reifiable(id);
        if let Construct::Topic(_) = record {
            self.reification.clear_by_topic(id);
            for t in self.characteristics.types_of(id) {
                self.characteristics.remove_type(id, t);
            }
            for i in self.characteristics.instances_of(id) {
                self.characteristics.remove_type(i, id);
            }
            for s in self.characteristics.supertypes_of(id) {
                self.characteristics.remove_supertype(id, s);
            }
            for s in self.characteristics.subtypes_of(id) {
                self.characteristics.remove_supertype(s, id);
            }
        }
    }

    /// Constraint-checked cascade removal.
    ///
    /// Owned children (names, occurrences, variants, roles) are removed
    /// with their owner. A topic still referenced from elsewhere — as a
    /// player, a type, a supertype, or a theme of a scope in use — cannot
    /// be removed directly; merge repoints those references first.
    pub(crate) fn remove_construct_checked(&mut self, id: ConstructId) -> Result<(), EngineError> {
        let Some(record) = self.record(id).cloned() else {
            return Err(EngineError::ModelConstraint(format!(
                "construct {id:?} does not exist"
            )));
        };
        match record {
            Construct::Topic(_) => {
                if !self.characteristics.roles_played(id).is_empty() {
                    return Err(EngineError::ModelConstraint(format!(
                        "topic {id:?} still plays roles"
                    )));
                }
                if !self.characteristics.instances_of(id).is_empty()
                    || !self.characteristics.typed_by(id).is_empty()
                {
                    return Err(EngineError::ModelConstraint(format!(
                        "topic {id:?} is still used as a type"
                    )));
                }
                if !self.characteristics.subtypes_of(id).is_empty() {
                    return Err(EngineError::ModelConstraint(format!(
                        "topic {id:?} is still used as a supertype"
                    )));
                }
                for scope in self.scopes.scopes_with_theme(id) {
                    if !self.scopes.scoped_by(scope).is_empty() {
                        return Err(EngineError::ModelConstraint(format!(
                            "topic {id:?} is still a theme of a scope in use"
                        )));
                    }
                }
                for name in self.characteristics.names_of(id) {
                    for variant in self.characteristics.variants_of(name) {
                        self.remove_record_forced(variant);
                    }
                    self.remove_record_forced(name);
                }
                for occurrence in self.characteristics.occurrences_of(id) {
                    self.remove_record_forced(occurrence);
                }
                self.remove_record_forced(id);
            }
            Construct::Association(_) => {
                for role in self.characteristics.roles_of(id) {
                    self.remove_record_forced(role);
                }
                self.remove_record_forced(id);
            }
            Construct::Name(_) => {
                for variant in self.characteristics.variants_of(id) {
                    self.remove_record_forced(variant);
                }
                self.remove_record_forced(id);
            }
            Construct::Role(_) | Construct::Occurrence(_) | Construct::Variant(_) => {
                self.remove_record_forced(id);
            }
        }
        Ok(())
    }
}

impl StoreReads for MemoryStore {
    fn kind(&self, id: ConstructId) -> Option<ConstructKind> {
        self.record(id).map(Construct::kind)
    }

    fn construct(&self, id: ConstructId) -> Option<Construct> {
        self.record(id).cloned()
    }

    fn resolve(&self, locator: &Locator) -> Option<ConstructId> {
        self.identity.resolve(locator)
    }

    fn identifiers_of(&self, construct: ConstructId) -> IdentifierSets {
        self.identity.identifiers_of(construct)
    }

    fn names_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.characteristics.names_of(topic)
    }

    fn occurrences_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.characteristics.occurrences_of(topic)
    }

    fn variants_of(&self, name: ConstructId) -> Vec<ConstructId> {
        self.characteristics.variants_of(name)
    }

    fn roles_of(&self, association: ConstructId) -> Vec<ConstructId> {
        self.characteristics.roles_of(association)
    }

    fn roles_played(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.characteristics.roles_played(topic)
    }

    fn types_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.characteristics.types_of(topic)
    }

    fn instances_of(&self, type_topic: ConstructId) -> Vec<ConstructId> {
        self.characteristics.instances_of(type_topic)
    }

    fn supertypes_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.characteristics.supertypes_of(topic)
    }

    fn subtypes_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.characteristics.subtypes_of(topic)
    }

    fn typed_by(&self, type_topic: ConstructId) -> Vec<ConstructId> {
        self.characteristics.typed_by(type_topic)
    }

    fn themes_of(&self, scope: ScopeId) -> Option<BTreeSet<ConstructId>> {
        self.scopes.themes_of(scope)
    }

    fn scoped_by(&self, scope: ScopeId) -> Vec<ConstructId> {
        self.scopes.scoped_by(scope)
    }

    fn scopes_with_theme(&self, topic: ConstructId) -> Vec<ScopeId> {
        self.scopes.scopes_with_theme(topic)
    }

    fn scope_lookup(&self, themes: &BTreeSet<ConstructId>) -> Option<ScopeId> {
        self.scopes.lookup(themes)
    }

    fn reifier_of(&self, reifiable: ConstructId) -> Option<ConstructId> {
        self.reification.reifier_of(reifiable)
    }

    fn reified_by(&self, topic: ConstructId) -> Option<ConstructId> {
        self.reification.reified_by(topic)
    }

    fn topics(&self) -> Vec<ConstructId> {
        self.constructs
            .values()
            .filter(|c| c.kind() == ConstructKind::Topic)
            .map(Construct::id)
            .collect()
    }

    fn associations(&self) -> Vec<ConstructId> {
        self.constructs
            .values()
            .filter(|c| c.kind() == ConstructKind::Association)
            .map(Construct::id)
            .collect()
    }
}

// =============================================================================
// BASE STORE VIEW
// =============================================================================

/// Mutable view over the base store with the shared id allocator.
///
/// This is the `StoreView` the engine hands out for `View::Base`
/// operations; transaction overlays provide their own implementation.
#[derive(Debug)]
pub struct BaseStore<'a> {
    pub(crate) store: &'a mut MemoryStore,
    pub(crate) alloc: &'a mut IdAllocator,
}

impl StoreReads for BaseStore<'_> {
    fn kind(&self, id: ConstructId) -> Option<ConstructKind> {
        self.store.kind(id)
    }
    fn construct(&self, id: ConstructId) -> Option<Construct> {
        self.store.construct(id)
    }
    fn resolve(&self, locator: &Locator) -> Option<ConstructId> {
        self.store.resolve(locator)
    }
    fn identifiers_of(&self, construct: ConstructId) -> IdentifierSets {
        self.store.identifiers_of(construct)
    }
    fn names_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.store.names_of(topic)
    }
    fn occurrences_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.store.occurrences_of(topic)
    }
    fn variants_of(&self, name: ConstructId) -> Vec<ConstructId> {
        self.store.variants_of(name)
    }
    fn roles_of(&self, association: ConstructId) -> Vec<ConstructId> {
        self.store.roles_of(association)
    }
    fn roles_played(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.store.roles_played(topic)
    }
    fn types_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.store.types_of(topic)
    }
    fn instances_of(&self, type_topic: ConstructId) -> Vec<ConstructId> {
        self.store.instances_of(type_topic)
    }
    fn supertypes_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.store.supertypes_of(topic)
    }
    fn subtypes_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.store.subtypes_of(topic)
    }
    fn typed_by(&self, type_topic: ConstructId) -> Vec<ConstructId> {
        self.store.typed_by(type_topic)
    }
    fn themes_of(&self, scope: ScopeId) -> Option<BTreeSet<ConstructId>> {
        self.store.themes_of(scope)
    }
    fn scoped_by(&self, scope: ScopeId) -> Vec<ConstructId> {
        self.store.scoped_by(scope)
    }
    fn scopes_with_theme(&self, topic: ConstructId) -> Vec<ScopeId> {
        self.store.scopes_with_theme(topic)
    }
    fn scope_lookup(&self, themes: &BTreeSet<ConstructId>) -> Option<ScopeId> {
        self.store.scope_lookup(themes)
    }
    fn reifier_of(&self, reifiable: ConstructId) -> Option<ConstructId> {
        self.store.reifier_of(reifiable)
    }
    fn reified_by(&self, topic: ConstructId) -> Option<ConstructId> {
        self.store.reified_by(topic)
    }
    fn topics(&self) -> Vec<ConstructId> {
        self.store.topics()
    }
    fn associations(&self) -> Vec<ConstructId> {
        self.store.associations()
    }
}

impl BaseStore<'_> {
    /// Clone-modify-replace helper for scalar edits on existing records.
    fn edit_record(
        &mut self,
        id: ConstructId,
        edit: impl FnOnce(&mut Construct) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        let Some(mut record) = self.store.construct(id) else {
            return Err(EngineError::ModelConstraint(format!(
                "construct {id:?} does not exist"
            )));
        };
        edit(&mut record)?;
        self.store.replace_record(record)
    }
}

fn not_capable(id: ConstructId, capability: &str) -> EngineError {
    EngineError::ModelConstraint(format!("construct {id:?} is not {capability}"))
}

impl StoreView for BaseStore<'_> {
    fn create_topic(&mut self) -> Result<ConstructId, EngineError> {
        let id = self.alloc.next_id();
        self.store.insert_record(Construct::Topic(Topic { id }))?;
        Ok(id)
    }

    fn create_association(
        &mut self,
        type_id: ConstructId,
        scope: ScopeId,
    ) -> Result<ConstructId, EngineError> {
        let id = self.alloc.next_id();
        self.store.insert_record(Construct::Association(Association {
            id,
            type_id,
            scope,
        }))?;
        Ok(id)
    }

    fn create_role(
        &mut self,
        association: ConstructId,
        type_id: ConstructId,
        player: ConstructId,
    ) -> Result<ConstructId, EngineError> {
        let id = self.alloc.next_id();
        self.store.insert_record(Construct::Role(Role {
            id,
            parent: association,
            type_id,
            player,
        }))?;
        Ok(id)
    }

    fn create_name(
        &mut self,
        topic: ConstructId,
        type_id: ConstructId,
        scope: ScopeId,
        value: String,
    ) -> Result<ConstructId, EngineError> {
        let id = self.alloc.next_id();
        self.store.insert_record(Construct::Name(Name {
            id,
            parent: topic,
            type_id,
            scope,
            value,
        }))?;
        Ok(id)
    }

    fn create_occurrence(
        &mut self,
        topic: ConstructId,
        type_id: ConstructId,
        scope: ScopeId,
        value: LiteralValue,
    ) -> Result<ConstructId, EngineError> {
        let id = self.alloc.next_id();
        self.store.insert_record(Construct::Occurrence(Occurrence {
            id,
            parent: topic,
            type_id,
            scope,
            value,
        }))?;
        Ok(id)
    }

    fn create_variant(
        &mut self,
        name: ConstructId,
        scope: ScopeId,
        value: LiteralValue,
    ) -> Result<ConstructId, EngineError> {
        let id = self.alloc.next_id();
        self.store.insert_record(Construct::Variant(Variant {
            id,
            parent: name,
            scope,
            value,
        }))?;
        Ok(id)
    }

    fn add_identifier(
        &mut self,
        construct: ConstructId,
        kind: IdentifierKind,
        locator: Locator,
    ) -> Result<(), EngineError> {
        let Some(target_kind) = self.store.kind(construct) else {
            return Err(EngineError::ModelConstraint(format!(
                "construct {construct:?} does not exist"
            )));
        };
        if kind != IdentifierKind::ItemIdentifier && target_kind != ConstructKind::Topic {
            return Err(EngineError::ModelConstraint(format!(
                "only topics carry {kind:?}"
            )));
        }
        self.store.identity.register(construct, kind, locator)
    }

    fn remove_identifier(
        &mut self,
        construct: ConstructId,
        kind: IdentifierKind,
        locator: &Locator,
    ) -> Result<(), EngineError> {
        self.store.identity.unregister(construct, kind, locator);
        Ok(())
    }

    fn add_type(
        &mut self,
        topic: ConstructId,
        type_topic: ConstructId,
    ) -> Result<(), EngineError> {
        self.store.require_topic(topic, "instance")?;
        self.store.require_topic(type_topic, "type")?;
        self.store.characteristics.add_type(topic, type_topic);
        Ok(())
    }

    fn remove_type(
        &mut self,
        topic: ConstructId,
        type_topic: ConstructId,
    ) -> Result<(), EngineError> {
        self.store.characteristics.remove_type(topic, type_topic);
        Ok(())
    }

    fn add_supertype(
        &mut self,
        topic: ConstructId,
        supertype: ConstructId,
    ) -> Result<(), EngineError> {
        self.store.require_topic(topic, "subtype")?;
        self.store.require_topic(supertype, "supertype")?;
        self.store.characteristics.add_supertype(topic, supertype);
        Ok(())
    }

    fn remove_supertype(
        &mut self,
        topic: ConstructId,
        supertype: ConstructId,
    ) -> Result<(), EngineError> {
        self.store.characteristics.remove_supertype(topic, supertype);
        Ok(())
    }

    fn set_type(
        &mut self,
        construct: ConstructId,
        type_topic: ConstructId,
    ) -> Result<(), EngineError> {
        self.edit_record(construct, |record| match record {
            Construct::Association(a) => {
                a.type_id = type_topic;
                Ok(())
            }
            Construct::Role(r) => {
                r.type_id = type_topic;
                Ok(())
            }
            Construct::Name(n) => {
                n.type_id = type_topic;
                Ok(())
            }
            Construct::Occurrence(o) => {
                o.type_id = type_topic;
                Ok(())
            }
            _ => Err(not_capable(construct, "typed")),
        })
    }

    fn set_scope(&mut self, construct: ConstructId, scope: ScopeId) -> Result<(), EngineError> {
        self.edit_record(construct, |record| match record {
            Construct::Association(a) => {
                a.scope = scope;
                Ok(())
            }
            Construct::Name(n) => {
                n.scope = scope;
                Ok(())
            }
            Construct::Occurrence(o) => {
                o.scope = scope;
                Ok(())
            }
            Construct::Variant(v) => {
                v.scope = scope;
                Ok(())
            }
            _ => Err(not_capable(construct, "scoped")),
        })
    }

    fn set_name_value(&mut self, name: ConstructId, value: String) -> Result<(), EngineError> {
        self.edit_record(name, |record| match record {
            Construct::Name(n) => {
                n.value = value;
                Ok(())
            }
            _ => Err(not_capable(name, "a name")),
        })
    }

    fn set_literal(
        &mut self,
        construct: ConstructId,
        value: LiteralValue,
    ) -> Result<(), EngineError> {
        self.edit_record(construct, |record| match record {
            Construct::Occurrence(o) => {
                o.value = value;
                Ok(())
            }
            Construct::Variant(v) => {
                v.value = value;
                Ok(())
            }
            _ => Err(not_capable(construct, "a literal carrier")),
        })
    }

    fn set_player(&mut self, role: ConstructId, player: ConstructId) -> Result<(), EngineError> {
        self.edit_record(role, |record| match record {
            Construct::Role(r) => {
                r.player = player;
                Ok(())
            }
            _ => Err(not_capable(role, "a role")),
        })
    }

    fn set_reifier(
        &mut self,
        construct: ConstructId,
        reifier: Option<ConstructId>,
    ) -> Result<(), EngineError> {
        let Some(kind) = self.store.kind(construct) else {
            return Err(EngineError::ModelConstraint(format!(
                "construct {construct:?} does not exist"
            )));
        };
        if kind == ConstructKind::Topic {
            return Err(not_capable(construct, "reifiable"));
        }
        match reifier {
            Some(topic) => {
                self.store.require_topic(topic, "reifier")?;
                self.store.reification.set(construct, topic)
            }
            None => {
                self.store.reification.clear_by_reifiable(construct);
                Ok(())
            }
        }
    }

    fn reparent(
        &mut self,
        construct: ConstructId,
        new_parent: ConstructId,
    ) -> Result<(), EngineError> {
        self.edit_record(construct, |record| match record {
            Construct::Name(n) => {
                n.parent = new_parent;
                Ok(())
            }
            Construct::Occurrence(o) => {
                o.parent = new_parent;
                Ok(())
            }
            Construct::Variant(v) => {
                v.parent = new_parent;
                Ok(())
            }
            _ => Err(not_capable(construct, "an owned characteristic")),
        })
    }

    fn remove_construct(&mut self, id: ConstructId) -> Result<(), EngineError> {
        self.store.remove_construct_checked(id)
    }

    fn scope_for(&mut self, themes: &BTreeSet<ConstructId>) -> Result<ScopeId, EngineError> {
        for &theme in themes {
            self.store.require_topic(theme, "theme")?;
        }
        Ok(self.store.scopes.scope_for(themes))
    }
}

// =============================================================================
// BACKEND CONTRACT
// =============================================================================

/// Offset + limit window for bulk queries. Limits are clamped to
/// [`crate::primitives::MAX_PAGE_LIMIT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

pub(crate) fn apply_page(mut items: Vec<ConstructId>, page: Option<Page>) -> Vec<ConstructId> {
    let Some(page) = page else {
        return items;
    };
    let limit = page.limit.min(crate::primitives::MAX_PAGE_LIMIT);
    if page.offset >= items.len() {
        return Vec::new();
    }
    let mut tail = items.split_off(page.offset);
    tail.truncate(limit);
    tail
}

/// Contract a persistence backend fulfils for one topic map.
///
/// The relational backend consumes this from outside the crate;
/// `MemoryStore` implements it so the engine and tests can run against
/// the same surface. Ids are assigned by the engine's allocator; the
/// backend persists records as given. A missing construct is
/// `Ok(None)` — backend failures are `Err(Store)` and are never folded
/// into "not found".
pub trait ConstructBackend {
    fn create(&mut self, construct: Construct) -> Result<ConstructId, EngineError>;
    fn read(&self, id: ConstructId) -> Result<Option<Construct>, EngineError>;
    fn delete(&mut self, id: ConstructId) -> Result<(), EngineError>;

    /// Typed constructs (associations, roles, names, occurrences) of a type.
    fn by_type(
        &self,
        type_topic: ConstructId,
        page: Option<Page>,
    ) -> Result<Vec<ConstructId>, EngineError>;
    /// As `by_type`, ordered by a caller-supplied comparator before paging.
    fn by_type_ordered(
        &self,
        type_topic: ConstructId,
        page: Option<Page>,
        cmp: &dyn Fn(&Construct, &Construct) -> Ordering,
    ) -> Result<Vec<ConstructId>, EngineError>;
    fn by_scope(&self, scope: ScopeId, page: Option<Page>)
        -> Result<Vec<ConstructId>, EngineError>;
    /// Names, occurrences and variants whose string value equals `value`.
    fn by_value(&self, value: &str, page: Option<Page>) -> Result<Vec<ConstructId>, EngineError>;

    fn create_revision(
        &mut self,
        kind: EventKind,
        changeset: Changeset,
        tag: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<RevisionId, EngineError>;
    fn read_changeset(&self, id: RevisionId) -> Result<Option<Changeset>, EngineError>;
    fn read_revision_by_tag(&self, tag: &str) -> Result<Option<Revision>, EngineError>;
    fn read_revision_by_timestamp(
        &self,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<Revision>, EngineError>;
}

impl ConstructBackend for MemoryStore {
    fn create(&mut self, construct: Construct) -> Result<ConstructId, EngineError> {
        let id = construct.id();
        self.insert_record(construct)?;
        Ok(id)
    }

    fn read(&self, id: ConstructId) -> Result<Option<Construct>, EngineError> {
        Ok(self.construct(id))
    }

    fn delete(&mut self, id: ConstructId) -> Result<(), EngineError> {
        self.remove_construct_checked(id)
    }

    fn by_type(
        &self,
        type_topic: ConstructId,
        page: Option<Page>,
    ) -> Result<Vec<ConstructId>, EngineError> {
        Ok(apply_page(self.typed_by(type_topic), page))
    }

    fn by_type_ordered(
        &self,
        type_topic: ConstructId,
        page: Option<Page>,
        cmp: &dyn Fn(&Construct, &Construct) -> Ordering,
    ) -> Result<Vec<ConstructId>, EngineError> {
        let mut records: Vec<Construct> = self
            .typed_by(type_topic)
            .into_iter()
            .filter_map(|id| self.construct(id))
            .collect();
        records.sort_by(|a, b| cmp(a, b).then_with(|| a.id().cmp(&b.id())));
        Ok(apply_page(records.into_iter().map(|c| c.id()).collect(), page))
    }

    fn by_scope(
        &self,
        scope: ScopeId,
        page: Option<Page>,
    ) -> Result<Vec<ConstructId>, EngineError> {
        Ok(apply_page(self.scoped_by(scope), page))
    }

    fn by_value(&self, value: &str, page: Option<Page>) -> Result<Vec<ConstructId>, EngineError> {
        let matches = self
            .records()
            .filter(|record| match record {
                Construct::Name(n) => n.value == value,
                Construct::Occurrence(o) => o.value.value == value,
                Construct::Variant(v) => v.value.value == value,
                _ => false,
            })
            .map(Construct::id)
            .collect();
        Ok(apply_page(matches, page))
    }

    fn create_revision(
        &mut self,
        kind: EventKind,
        changeset: Changeset,
        tag: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<RevisionId, EngineError> {
        Ok(self.revisions.append(kind, changeset, tag, metadata))
    }

    fn read_changeset(&self, id: RevisionId) -> Result<Option<Changeset>, EngineError> {
        Ok(self.revisions.get(id).map(|r| r.changeset.clone()))
    }

    fn read_revision_by_tag(&self, tag: &str) -> Result<Option<Revision>, EngineError> {
        Ok(self.revisions.by_tag(tag).cloned())
    }

    fn read_revision_by_timestamp(
        &self,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<Revision>, EngineError> {
        Ok(self.revisions.by_timestamp(timestamp).cloned())
    }
}

// =============================================================================
// TESTS
// =============================================================================

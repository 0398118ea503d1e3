//! # Transaction Overlay
//!
//! Copy-on-write view over the base store. Writes land only in the
//! overlay; reads merge local additions with base facts minus removal
//! tombstones. The base store is never mutated before commit, and commit
//! validates everything before applying anything, so a transaction is
//! atomic to outside observers.
//!
//! Constructs created inside the transaction get engine-global ids from
//! the shared allocator and keep them across commit. Scope ids are the
//! one provisional resource: a theme set first interned inside a
//! transaction gets a high-bit-tagged id that is re-canonicalized against
//! the base at commit, so overlapping transactions converge on one
//! `ScopeId` per theme set.

use crate::model::{
    Association, Construct, IdentifierSets, Name, Occurrence, Role, Topic, Variant,
};
use crate::revision::{freeze, ChangeKind, Changeset, Delta, EventKind};
use crate::store::{IdAllocator, MemoryStore};
use crate::types::{
    ConstructId, ConstructKind, EngineError, IdentifierKind, Locator, RevisionId, ScopeId,
};
use crate::{LiteralValue, StoreReads, StoreView};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

/// Tag bit marking a scope id as provisional to one transaction.
/// Provisional ids never reach the base store.
const PROVISIONAL_SCOPE_BIT: u64 = 1 << 63;

fn is_provisional(scope: ScopeId) -> bool {
    scope.0 & PROVISIONAL_SCOPE_BIT != 0
}

// =============================================================================
// RELATION OVERLAY
// =============================================================================

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

/// Added/removed edge sets for one topic-to-topic relation, kept in both
/// directions so forward and reverse queries merge symmetrically.
#[derive(Debug, Clone, Default)]
struct RelOverlay {
    added: Adjacency,
    added_rev: Adjacency,
    removed: Adjacency,
    removed_rev: Adjacency,
}

impl RelOverlay {
    fn add(&mut self, a: ConstructId, b: ConstructId) {
        adj_remove(&mut self.removed, a, b);
        adj_remove(&mut self.removed_rev, b, a);
        adj_insert(&mut self.added, a, b);
        adj_insert(&mut self.added_rev, b, a);
    }

    fn remove(&mut self, a: ConstructId, b: ConstructId) {
        adj_remove(&mut self.added, a, b);
        adj_remove(&mut self.added_rev, b, a);
        adj_insert(&mut self.removed, a, b);
        adj_insert(&mut self.removed_rev, b, a);
    }

    /// Base facts for `a`, minus removed edges, plus added edges.
    fn fwd(&self, a: ConstructId, base: Vec<ConstructId>) -> BTreeSet<ConstructId> {
        let removed = self.removed.get(&a);
        let mut out: BTreeSet<ConstructId> = base
            .into_iter()
            .filter(|b| removed.is_none_or(|set| !set.contains(b)))
            .collect();
        if let Some(added) = self.added.get(&a) {
            out.extend(added.iter().copied());
        }
        out
    }

    fn rev(&self, b: ConstructId, base: Vec<ConstructId>) -> BTreeSet<ConstructId> {
        let removed = self.removed_rev.get(&b);
        let mut out: BTreeSet<ConstructId> = base
            .into_iter()
            .filter(|a| removed.is_none_or(|set| !set.contains(a)))
            .collect();
        if let Some(added) = self.added_rev.get(&b) {
            out.extend(added.iter().copied());
        }
        out
    }

    /// Drop every overlay edge touching `id`, both directions.
    fn purge(&mut self, id: ConstructId) {
        for (map, rev) in [
            (&mut self.added, &mut self.added_rev),
            (&mut self.removed, &mut self.removed_rev),
        ] {
            if let Some(members) = map.remove(&id) {
                for member in members {
                    adj_remove(rev, member, id);
                }
            }
            if let Some(keys) = rev.remove(&id) {
                for key in keys {
                    adj_remove(map, key, id);
                }
            }
        }
    }

    fn added_pairs(&self) -> impl Iterator<Item = (ConstructId, ConstructId)> + '_ {
        self.added
            .iter()
            .flat_map(|(&a, set)| set.iter().map(move |&b| (a, b)))
    }

    fn removed_pairs(&self) -> impl Iterator<Item = (ConstructId, ConstructId)> + '_ {
        self.removed
            .iter()
            .flat_map(|(&a, set)| set.iter().map(move |&b| (a, b)))
    }
}

// =============================================================================
// OVERLAY STATE
// =============================================================================

/// Per-transaction copy-on-write state.
#[derive(Debug, Default)]
pub(crate) struct TxnOverlay {
    /// Lazy stub map: base ids observed through this transaction's reads,
    /// with their kinds. Populated on first touch, so repeated lookups
    /// resolve locally.
    stubs: RefCell<BTreeMap<ConstructId, ConstructKind>>,
    /// Materialized records: created constructs and copy-on-write clones
    /// of modified base records. Never overlaps `tombstones`.
    local: BTreeMap<ConstructId, Construct>,
    created: BTreeSet<ConstructId>,
    /// Base constructs removed in this transaction. Consulted first by
    /// every accessor and mutation.
    tombstones: BTreeSet<ConstructId>,
    /// Base constructs whose frozen image changes at commit.
    touched: BTreeSet<ConstructId>,
    identity_adds: BTreeMap<Locator, (IdentifierKind, ConstructId)>,
    identity_removes: BTreeMap<Locator, (IdentifierKind, ConstructId)>,
    types: RelOverlay,
    supertypes: RelOverlay,
    reif_set: BTreeMap<ConstructId, ConstructId>,
    reif_set_rev: BTreeMap<ConstructId, ConstructId>,
    reif_cleared: BTreeSet<ConstructId>,
    reif_cleared_rev: BTreeSet<ConstructId>,
    /// Provisional scope id -> theme set, interned inside this txn only.
    txn_scopes: BTreeMap<ScopeId, BTreeSet<ConstructId>>,
    txn_scope_canonical: BTreeMap<BTreeSet<ConstructId>, ScopeId>,
    /// Whether a topic merge ran inside this transaction.
    pub(crate) merged: bool,
}

impl TxnOverlay {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

// =============================================================================
// MERGED READ VIEW
// =============================================================================

/// Read-only merged view: overlay over base.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TxnReader<'a> {
    pub(crate) base: &'a MemoryStore,
    pub(crate) overlay: &'a TxnOverlay,
}

impl TxnReader<'_> {
    fn tombstoned(&self, id: ConstructId) -> bool {
        self.overlay.tombstones.contains(&id)
    }

    fn note_stub(&self, id: ConstructId, kind: ConstructKind) {
        self.overlay.stubs.borrow_mut().entry(id).or_insert(kind);
    }

    /// Children/members of `key` merged from base and overlay records.
    /// `link` extracts the back-reference this relation follows.
    fn merged_members(
        &self,
        key: ConstructId,
        base_members: Vec<ConstructId>,
        link: impl Fn(&Construct) -> Option<ConstructId>,
    ) -> Vec<ConstructId> {
        if self.tombstoned(key) {
            return Vec::new();
        }
        let mut out = BTreeSet::new();
        for id in base_members {
            if self.tombstoned(id) {
                continue;
            }
            match self.overlay.local.get(&id) {
                Some(record) => {
                    if link(record) == Some(key) {
                        out.insert(id);
                    }
                }
                None => {
                    out.insert(id);
                }
            }
        }
        for (&id, record) in &self.overlay.local {
            if link(record) == Some(key) {
                out.insert(id);
            }
        }
        out.into_iter().collect()
    }

    fn rel_fwd(&self, rel: &RelOverlay, key: ConstructId, base: Vec<ConstructId>) -> Vec<ConstructId> {
        if self.tombstoned(key) {
            return Vec::new();
        }
        rel.fwd(key, base)
            .into_iter()
            .filter(|id| !self.tombstoned(*id))
            .collect()
    }

    fn rel_rev(&self, rel: &RelOverlay, key: ConstructId, base: Vec<ConstructId>) -> Vec<ConstructId> {
        if self.tombstoned(key) {
            return Vec::new();
        }
        rel.rev(key, base)
            .into_iter()
            .filter(|id| !self.tombstoned(*id))
            .collect()
    }

    fn kind_filtered(&self, want: ConstructKind, base_ids: Vec<ConstructId>) -> Vec<ConstructId> {
        let mut out = BTreeSet::new();
        for id in base_ids {
            if !self.tombstoned(id) {
                out.insert(id);
            }
        }
        for (&id, record) in &self.overlay.local {
            if record.kind() == want {
                out.insert(id);
            }
        }
        out.into_iter().collect()
    }
}

impl StoreReads for TxnReader<'_> {
    fn kind(&self, id: ConstructId) -> Option<ConstructKind> {
        if self.tombstoned(id) {
            return None;
        }
        if let Some(record) = self.overlay.local.get(&id) {
            return Some(record.kind());
        }
        if let Some(&kind) = self.overlay.stubs.borrow().get(&id) {
            return Some(kind);
        }
        let kind = self.base.kind(id)?;
        self.note_stub(id, kind);
        Some(kind)
    }

    fn construct(&self, id: ConstructId) -> Option<Construct> {
        if self.tombstoned(id) {
            return None;
        }
        if let Some(record) = self.overlay.local.get(&id) {
            return Some(record.clone());
        }
        let record = self.base.construct(id)?;
        self.note_stub(id, record.kind());
        Some(record)
    }

    fn resolve(&self, locator: &Locator) -> Option<ConstructId> {
        if let Some(&(_, id)) = self.overlay.identity_adds.get(locator) {
            return (!self.tombstoned(id)).then_some(id);
        }
        if self.overlay.identity_removes.contains_key(locator) {
            return None;
        }
        let id = self.base.resolve(locator)?;
        (!self.tombstoned(id)).then_some(id)
    }

    fn identifiers_of(&self, construct: ConstructId) -> IdentifierSets {
        if self.tombstoned(construct) {
            return IdentifierSets::default();
        }
        let mut sets = self.base.identifiers_of(construct);
        for (locator, &(kind, owner)) in &self.overlay.identity_removes {
            if owner == construct {
                match kind {
                    IdentifierKind::SubjectIdentifier => sets.subject_identifiers.remove(locator),
                    IdentifierKind::SubjectLocator => sets.subject_locators.remove(locator),
                    IdentifierKind::ItemIdentifier => sets.item_identifiers.remove(locator),
                };
            }
        }
        for (locator, &(kind, owner)) in &self.overlay.identity_adds {
            if owner == construct {
                match kind {
                    IdentifierKind::SubjectIdentifier => {
                        sets.subject_identifiers.insert(locator.clone())
                    }
                    IdentifierKind::SubjectLocator => sets.subject_locators.insert(locator.clone()),
                    IdentifierKind::ItemIdentifier => sets.item_identifiers.insert(locator.clone()),
                };
            }
        }
        sets
    }

    fn names_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.merged_members(topic, self.base.names_of(topic), |r| match r {
            Construct::Name(n) => Some(n.parent),
            _ => None,
        })
    }

    fn occurrences_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.merged_members(topic, self.base.occurrences_of(topic), |r| match r {
            Construct::Occurrence(o) => Some(o.parent),
            _ => None,
        })
    }

    fn variants_of(&self, name: ConstructId) -> Vec<ConstructId> {
        self.merged_members(name, self.base.variants_of(name), |r| match r {
            Construct::Variant(v) => Some(v.parent),
            _ => None,
        })
    }

    fn roles_of(&self, association: ConstructId) -> Vec<ConstructId> {
        self.merged_members(association, self.base.roles_of(association), |r| match r {
            Construct::Role(role) => Some(role.parent),
            _ => None,
        })
    }

    fn roles_played(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.merged_members(topic, self.base.roles_played(topic), |r| match r {
            Construct::Role(role) => Some(role.player),
            _ => None,
        })
    }

    fn types_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.rel_fwd(&self.overlay.types, topic, self.base.types_of(topic))
    }

    fn instances_of(&self, type_topic: ConstructId) -> Vec<ConstructId> {
        self.rel_rev(&self.overlay.types, type_topic, self.base.instances_of(type_topic))
    }

    fn supertypes_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.rel_fwd(&self.overlay.supertypes, topic, self.base.supertypes_of(topic))
    }

    fn subtypes_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.rel_rev(&self.overlay.supertypes, topic, self.base.subtypes_of(topic))
    }

    fn typed_by(&self, type_topic: ConstructId) -> Vec<ConstructId> {
        self.merged_members(type_topic, self.base.typed_by(type_topic), |r| r.type_id())
    }

    fn themes_of(&self, scope: ScopeId) -> Option<BTreeSet<ConstructId>> {
        if is_provisional(scope) {
            return self.overlay.txn_scopes.get(&scope).cloned();
        }
        self.base.themes_of(scope)
    }

    fn scoped_by(&self, scope: ScopeId) -> Vec<ConstructId> {
        let base_members = if is_provisional(scope) {
            Vec::new()
        } else {
            self.base.scoped_by(scope)
        };
        let mut out = BTreeSet::new();
        for id in base_members {
            if self.tombstoned(id) {
                continue;
            }
            match self.overlay.local.get(&id) {
                Some(record) => {
                    if record.scope() == Some(scope) {
                        out.insert(id);
                    }
                }
                None => {
                    out.insert(id);
                }
            }
        }
        for (&id, record) in &self.overlay.local {
            if record.scope() == Some(scope) {
                out.insert(id);
            }
        }
        out.into_iter().collect()
    }

    fn scopes_with_theme(&self, topic: ConstructId) -> Vec<ScopeId> {
        if self.tombstoned(topic) {
            return Vec::new();
        }
        let mut out: BTreeSet<ScopeId> = self.base.scopes_with_theme(topic).into_iter().collect();
        for (&scope, themes) in &self.overlay.txn_scopes {
            if themes.contains(&topic) {
                out.insert(scope);
            }
        }
        out.into_iter().collect()
    }

    fn scope_lookup(&self, themes: &BTreeSet<ConstructId>) -> Option<ScopeId> {
        self.base
            .scope_lookup(themes)
            .or_else(|| self.overlay.txn_scope_canonical.get(themes).copied())
    }

    fn reifier_of(&self, reifiable: ConstructId) -> Option<ConstructId> {
        if self.tombstoned(reifiable) {
            return None;
        }
        if let Some(&topic) = self.overlay.reif_set.get(&reifiable) {
            return (!self.tombstoned(topic)).then_some(topic);
        }
        if self.overlay.reif_cleared.contains(&reifiable) {
            return None;
        }
        let topic = self.base.reifier_of(reifiable)?;
        (!self.tombstoned(topic)).then_some(topic)
    }

    fn reified_by(&self, topic: ConstructId) -> Option<ConstructId> {
        if self.tombstoned(topic) {
            return None;
        }
        if let Some(&reifiable) = self.overlay.reif_set_rev.get(&topic) {
            return (!self.tombstoned(reifiable)).then_some(reifiable);
        }
        if self.overlay.reif_cleared_rev.contains(&topic) {
            return None;
        }
        let reifiable = self.base.reified_by(topic)?;
        (!self.tombstoned(reifiable)).then_some(reifiable)
    }

    fn topics(&self) -> Vec<ConstructId> {
        self.kind_filtered(ConstructKind::Topic, self.base.topics())
    }

    fn associations(&self) -> Vec<ConstructId> {
        self.kind_filtered(ConstructKind::Association, self.base.associations())
    }
}

// =============================================================================
// MUTABLE TRANSACTION VIEW
// =============================================================================

/// The `StoreView` over one transaction.
#[derive(Debug)]
pub(crate) struct TxnStore<'a> {
    pub(crate) base: &'a MemoryStore,
    pub(crate) overlay: &'a mut TxnOverlay,
    pub(crate) alloc: &'a mut IdAllocator,
}

impl TxnStore<'_> {
    fn reader(&self) -> TxnReader<'_> {
        TxnReader {
            base: self.base,
            overlay: self.overlay,
        }
    }

    /// Fail fast on tombstoned targets before any overlay state changes.
    fn ensure_not_tombstoned(&self, id: ConstructId) -> Result<(), EngineError> {
        if self.overlay.tombstones.contains(&id) {
            return Err(EngineError::ConstructRemoved(id));
        }
        Ok(())
    }

    fn ensure_live(&self, id: ConstructId) -> Result<ConstructKind, EngineError> {
        self.ensure_not_tombstoned(id)?;
        self.reader()
            .kind(id)
            .ok_or_else(|| EngineError::ModelConstraint(format!("construct {id:?} does not exist")))
    }

    fn require_topic(&self, id: ConstructId, what: &str) -> Result<(), EngineError> {
        match self.ensure_live(id)? {
            ConstructKind::Topic => Ok(()),
            _ => Err(EngineError::ModelConstraint(format!(
                "{what} {id:?} is not a topic"
            ))),
        }
    }

    fn require_scope(&self, scope: ScopeId) -> Result<(), EngineError> {
        let known = if is_provisional(scope) {
            self.overlay.txn_scopes.contains_key(&scope)
        } else {
            self.base.themes_of(scope).is_some()
        };
        if known {
            Ok(())
        } else {
            Err(EngineError::ModelConstraint(format!(
                "scope {scope:?} is not interned"
            )))
        }
    }

    fn mark_touched(&mut self, id: ConstructId) {
        if !self.overlay.created.contains(&id) && self.base.contains(id) {
            self.overlay.touched.insert(id);
        }
    }

    fn insert_created(&mut self, record: Construct) -> ConstructId {
        let id = record.id();
        self.overlay.local.insert(id, record);
        self.overlay.created.insert(id);
        id
    }

    /// Copy-on-write edit of an existing record.
    fn edit_record(
        &mut self,
        id: ConstructId,
        edit: impl FnOnce(&mut Construct) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        self.ensure_not_tombstoned(id)?;
        let Some(mut record) = self.reader().construct(id) else {
            return Err(EngineError::ModelConstraint(format!(
                "construct {id:?} does not exist"
            )));
        };
        edit(&mut record)?;
        self.overlay.local.insert(id, record);
        self.mark_touched(id);
        Ok(())
    }

    /// Clear the reification of `reifiable` in overlay terms, returning
    /// the topic that held it, if any.
    fn clear_reification(&mut self, reifiable: ConstructId) -> Option<ConstructId> {
        if let Some(topic) = self.overlay.reif_set.remove(&reifiable) {
            self.overlay.reif_set_rev.remove(&topic);
            return Some(topic);
        }
        if self.overlay.reif_cleared.contains(&reifiable) {
            return None;
        }
        let topic = self.base.reifier_of(reifiable)?;
        self.overlay.reif_cleared.insert(reifiable);
        self.overlay.reif_cleared_rev.insert(topic);
        Some(topic)
    }

    /// Retire one construct from the view: created constructs vanish
    /// without a tombstone, base constructs get one.
    fn drop_one(&mut self, id: ConstructId) {
        if let Some(reified) = self.reader().reified_by(id) {
            self.clear_reification(reified);
            self.mark_touched(reified);
        }
        if let Some(reifier) = self.clear_reification(id) {
            self.mark_touched(reifier);
        }
        self.overlay.identity_adds.retain(|_, (_, owner)| *owner != id);
        self.overlay.types.purge(id);
        self.overlay.supertypes.purge(id);
        self.overlay.local.remove(&id);
        self.overlay.touched.remove(&id);
        self.overlay.stubs.borrow_mut().remove(&id);
        if !self.overlay.created.remove(&id) {
            self.overlay.tombstones.insert(id);
        }
    }
}

impl StoreReads for TxnStore<'_> {
    fn kind(&self, id: ConstructId) -> Option<ConstructKind> {
        self.reader().kind(id)
    }
    fn construct(&self, id: ConstructId) -> Option<Construct> {
        self.reader().construct(id)
    }
    fn resolve(&self, locator: &Locator) -> Option<ConstructId> {
        self.reader().resolve(locator)
    }
    fn identifiers_of(&self, construct: ConstructId) -> IdentifierSets {
        self.reader().identifiers_of(construct)
    }
    fn names_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.reader().names_of(topic)
    }
    fn occurrences_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.reader().occurrences_of(topic)
    }
    fn variants_of(&self, name: ConstructId) -> Vec<ConstructId> {
        self.reader().variants_of(name)
    }
    fn roles_of(&self, association: ConstructId) -> Vec<ConstructId> {
        self.reader().roles_of(association)
    }
    fn roles_played(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.reader().roles_played(topic)
    }
    fn types_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.reader().types_of(topic)
    }
    fn instances_of(&self, type_topic: ConstructId) -> Vec<ConstructId> {
        self.reader().instances_of(type_topic)
    }
    fn supertypes_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.reader().supertypes_of(topic)
    }
    fn subtypes_of(&self, topic: ConstructId) -> Vec<ConstructId> {
        self.reader().subtypes_of(topic)
    }
    fn typed_by(&self, type_topic: ConstructId) -> Vec<ConstructId> {
        self.reader().typed_by(type_topic)
    }
    fn themes_of(&self, scope: ScopeId) -> Option<BTreeSet<ConstructId>> {
        self.reader().themes_of(scope)
    }
    fn scoped_by(&self, scope: ScopeId) -> Vec<ConstructId> {
        self.reader().scoped_by(scope)
    }
    fn scopes_with_theme(&self, topic: ConstructId) -> Vec<ScopeId> {
        self.reader().scopes_with_theme(topic)
    }
    fn scope_lookup(&self, themes: &BTreeSet<ConstructId>) -> Option<ScopeId> {
        self.reader().scope_lookup(themes)
    }
    fn reifier_of(&self, reifiable: ConstructId) -> Option<ConstructId> {
        self.reader().reifier_of(reifiable)
    }
    fn reified_by(&self, topic: ConstructId) -> Option<ConstructId> {
        self.reader().reified_by(topic)
    }
    fn topics(&self) -> Vec<ConstructId> {
        self.reader().topics()
    }
    fn associations(&self) -> Vec<ConstructId> {
        self.reader().associations()
    }
}

impl StoreView for TxnStore<'_> {
    fn create_topic(&mut self) -> Result<ConstructId, EngineError> {
        let id = self.alloc.next_id();
        Ok(self.insert_created(Construct::Topic(Topic { id })))
    }

    fn create_association(
        &mut self,
        type_id: ConstructId,
        scope: ScopeId,
    ) -> Result<ConstructId, EngineError> {
        self.require_topic(type_id, "association type")?;
        self.require_scope(scope)?;
        let id = self.alloc.next_id();
        Ok(self.insert_created(Construct::Association(Association {
            id,
            type_id,
            scope,
        })))
    }

    fn create_role(
        &mut self,
        association: ConstructId,
        type_id: ConstructId,
        player: ConstructId,
    ) -> Result<ConstructId, EngineError> {
        if self.ensure_live(association)? != ConstructKind::Association {
            return Err(EngineError::ModelConstraint(format!(
                "role parent {association:?} is not an association"
            )));
        }
        self.require_topic(type_id, "role type")?;
        self.require_topic(player, "role player")?;
        let id = self.alloc.next_id();
        let id = self.insert_created(Construct::Role(Role {
            id,
            parent: association,
            type_id,
            player,
        }));
        self.mark_touched(association);
        self.mark_touched(player);
        Ok(id)
    }

    fn create_name(
        &mut self,
        topic: ConstructId,
        type_id: ConstructId,
        scope: ScopeId,
        value: String,
    ) -> Result<ConstructId, EngineError> {
        self.require_topic(topic, "name parent")?;
        self.require_topic(type_id, "name type")?;
        self.require_scope(scope)?;
        let id = self.alloc.next_id();
        let id = self.insert_created(Construct::Name(Name {
            id,
            parent: topic,
            type_id,
            scope,
            value,
        }));
        self.mark_touched(topic);
        Ok(id)
    }

    fn create_occurrence(
        &mut self,
        topic: ConstructId,
        type_id: ConstructId,
        scope: ScopeId,
        value: LiteralValue,
    ) -> Result<ConstructId, EngineError> {
        self.require_topic(topic, "occurrence parent")?;
        self.require_topic(type_id, "occurrence type")?;
        self.require_scope(scope)?;
        let id = self.alloc.next_id();
        let id = self.insert_created(Construct::Occurrence(Occurrence {
            id,
            parent: topic,
            type_id,
            scope,
            value,
        }));
        self.mark_touched(topic);
        Ok(id)
    }

    fn create_variant(
        &mut self,
        name: ConstructId,
        scope: ScopeId,
        value: LiteralValue,
    ) -> Result<ConstructId, EngineError> {
        if self.ensure_live(name)? != ConstructKind::Name {
            return Err(EngineError::ModelConstraint(format!(
                "variant parent {name:?} is not a name"
            )));
        }
        self.require_scope(scope)?;
        let id = self.alloc.next_id();
        let id = self.insert_created(Construct::Variant(Variant {
            id,
            parent: name,
            scope,
            value,
        }));
        self.mark_touched(name);
        Ok(id)
    }

    fn add_identifier(
        &mut self,
        construct: ConstructId,
        kind: IdentifierKind,
        locator: Locator,
    ) -> Result<(), EngineError> {
        let target_kind = self.ensure_live(construct)?;
        if kind != IdentifierKind::ItemIdentifier && target_kind != ConstructKind::Topic {
            return Err(EngineError::ModelConstraint(format!(
                "only topics carry {kind:?}"
            )));
        }
        match self.reader().resolve(&locator) {
            Some(existing) if existing != construct => {
                return Err(EngineError::IdentityConstraint {
                    locator,
                    existing,
                    candidate: construct,
                });
            }
            Some(_) => return Ok(()),
            None => {}
        }
        // Re-adding an identifier removed earlier in this transaction just
        // cancels the removal.
        if self.overlay.identity_removes.get(&locator) == Some(&(kind, construct)) {
            self.overlay.identity_removes.remove(&locator);
        } else {
            self.overlay.identity_adds.insert(locator, (kind, construct));
        }
        self.mark_touched(construct);
        Ok(())
    }

    fn remove_identifier(
        &mut self,
        construct: ConstructId,
        kind: IdentifierKind,
        locator: &Locator,
    ) -> Result<(), EngineError> {
        self.ensure_not_tombstoned(construct)?;
        if self.overlay.identity_adds.get(locator) == Some(&(kind, construct)) {
            self.overlay.identity_adds.remove(locator);
            self.mark_touched(construct);
            return Ok(());
        }
        if let Some((base_kind, owner)) = self.base.identity.entry(locator) {
            if owner == construct && base_kind == kind {
                self.overlay
                    .identity_removes
                    .insert(locator.clone(), (kind, construct));
                self.mark_touched(construct);
            }
        }
        Ok(())
    }

    fn add_type(
        &mut self,
        topic: ConstructId,
        type_topic: ConstructId,
    ) -> Result<(), EngineError> {
        self.require_topic(topic, "instance")?;
        self.require_topic(type_topic, "type")?;
        self.overlay.types.add(topic, type_topic);
        self.mark_touched(topic);
        Ok(())
    }

    fn remove_type(
        &mut self,
        topic: ConstructId,
        type_topic: ConstructId,
    ) -> Result<(), EngineError> {
        self.ensure_not_tombstoned(topic)?;
        self.ensure_not_tombstoned(type_topic)?;
        self.overlay.types.remove(topic, type_topic);
        self.mark_touched(topic);
        Ok(())
    }

    fn add_supertype(
        &mut self,
        topic: ConstructId,
        supertype: ConstructId,
    ) -> Result<(), EngineError> {
        self.require_topic(topic, "subtype")?;
        self.require_topic(supertype, "supertype")?;
        self.overlay.supertypes.add(topic, supertype);
        self.mark_touched(topic);
        Ok(())
    }

    fn remove_supertype(
        &mut self,
        topic: ConstructId,
        supertype: ConstructId,
    ) -> Result<(), EngineError> {
        self.ensure_not_tombstoned(topic)?;
        self.ensure_not_tombstoned(supertype)?;
        self.overlay.supertypes.remove(topic, supertype);
        self.mark_touched(topic);
        Ok(())
    }

    fn set_type(
        &mut self,
        construct: ConstructId,
        type_topic: ConstructId,
    ) -> Result<(), EngineError> {
        self.require_topic(type_topic, "type")?;
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
            _ => Err(EngineError::ModelConstraint(format!(
                "construct {construct:?} is not typed"
            ))),
        })
    }

    fn set_scope(&mut self, construct: ConstructId, scope: ScopeId) -> Result<(), EngineError> {
        self.require_scope(scope)?;
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
            _ => Err(EngineError::ModelConstraint(format!(
                "construct {construct:?} is not scoped"
            ))),
        })
    }

    fn set_name_value(&mut self, name: ConstructId, value: String) -> Result<(), EngineError> {
        self.edit_record(name, |record| match record {
            Construct::Name(n) => {
                n.value = value;
                Ok(())
            }
            _ => Err(EngineError::ModelConstraint(format!(
                "construct {name:?} is not a name"
            ))),
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
            _ => Err(EngineError::ModelConstraint(format!(
                "construct {construct:?} is not a literal carrier"
            ))),
        })
    }

    fn set_player(&mut self, role: ConstructId, player: ConstructId) -> Result<(), EngineError> {
        self.require_topic(player, "role player")?;
        let old_player = match self.reader().construct(role) {
            Some(Construct::Role(r)) => r.player,
            _ => {
                self.ensure_not_tombstoned(role)?;
                return Err(EngineError::ModelConstraint(format!(
                    "construct {role:?} is not a role"
                )));
            }
        };
        self.edit_record(role, |record| match record {
            Construct::Role(r) => {
                r.player = player;
                Ok(())
            }
            _ => Err(EngineError::ModelConstraint(format!(
                "construct {role:?} is not a role"
            ))),
        })?;
        self.mark_touched(old_player);
        self.mark_touched(player);
        Ok(())
    }

    fn set_reifier(
        &mut self,
        construct: ConstructId,
        reifier: Option<ConstructId>,
    ) -> Result<(), EngineError> {
        let kind = self.ensure_live(construct)?;
        if kind == ConstructKind::Topic {
            return Err(EngineError::ModelConstraint(format!(
                "construct {construct:?} is not reifiable"
            )));
        }
        match reifier {
            Some(topic) => {
                self.require_topic(topic, "reifier")?;
                if self.reader().reifier_of(construct) == Some(topic) {
                    return Ok(());
                }
                if self.reader().reifier_of(construct).is_some() {
                    return Err(EngineError::ModelConstraint(format!(
                        "construct {construct:?} is already reified"
                    )));
                }
                if self.reader().reified_by(topic).is_some() {
                    return Err(EngineError::ModelConstraint(format!(
                        "topic {topic:?} already reifies another construct"
                    )));
                }
                if self.base.reifier_of(construct) == Some(topic) {
                    // Restoring the base pair cancels an earlier clear.
                    self.overlay.reif_cleared.remove(&construct);
                    self.overlay.reif_cleared_rev.remove(&topic);
                } else {
                    self.overlay.reif_set.insert(construct, topic);
                    self.overlay.reif_set_rev.insert(topic, construct);
                }
                self.mark_touched(construct);
                self.mark_touched(topic);
            }
            None => {
                if let Some(topic) = self.clear_reification(construct) {
                    self.mark_touched(construct);
                    self.mark_touched(topic);
                }
            }
        }
        Ok(())
    }

    fn reparent(
        &mut self,
        construct: ConstructId,
        new_parent: ConstructId,
    ) -> Result<(), EngineError> {
        let old_parent = self
            .reader()
            .construct(construct)
            .and_then(|r| r.parent());
        let expects_name_parent = matches!(
            self.reader().kind(construct),
            Some(ConstructKind::Variant)
        );
        if expects_name_parent {
            if self.ensure_live(new_parent)? != ConstructKind::Name {
                return Err(EngineError::ModelConstraint(format!(
                    "variant parent {new_parent:?} is not a name"
                )));
            }
        } else {
            self.require_topic(new_parent, "parent")?;
        }
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
            _ => Err(EngineError::ModelConstraint(format!(
                "construct {construct:?} is not an owned characteristic"
            ))),
        })?;
        if let Some(old_parent) = old_parent {
            self.mark_touched(old_parent);
        }
        self.mark_touched(new_parent);
        Ok(())
    }

    fn remove_construct(&mut self, id: ConstructId) -> Result<(), EngineError> {
        let kind = self.ensure_live(id)?;
        let reader = self.reader();
        let mut cascade = Vec::new();
        let mut parents = Vec::new();
        match kind {
            ConstructKind::Topic => {
                if !reader.roles_played(id).is_empty() {
                    return Err(EngineError::ModelConstraint(format!(
                        "topic {id:?} still plays roles"
                    )));
                }
                if !reader.instances_of(id).is_empty() || !reader.typed_by(id).is_empty() {
                    return Err(EngineError::ModelConstraint(format!(
                        "topic {id:?} is still used as a type"
                    )));
                }
                if !reader.subtypes_of(id).is_empty() {
                    return Err(EngineError::ModelConstraint(format!(
                        "topic {id:?} is still used as a supertype"
                    )));
                }
                for scope in reader.scopes_with_theme(id) {
                    if !reader.scoped_by(scope).is_empty() {
                        return Err(EngineError::ModelConstraint(format!(
                            "topic {id:?} is still a theme of a scope in use"
                        )));
                    }
                }
                for name in reader.names_of(id) {
                    cascade.extend(reader.variants_of(name));
                    cascade.push(name);
                }
                cascade.extend(reader.occurrences_of(id));
            }
            ConstructKind::Association => {
                for role in reader.roles_of(id) {
                    if let Some(Construct::Role(r)) = reader.construct(role) {
                        parents.push(r.player);
                    }
                    cascade.push(role);
                }
            }
            ConstructKind::Name => {
                cascade.extend(reader.variants_of(id));
                if let Some(record) = reader.construct(id) {
                    parents.extend(record.parent());
                }
            }
            ConstructKind::Role => {
                if let Some(Construct::Role(r)) = reader.construct(id) {
                    parents.push(r.parent);
                    parents.push(r.player);
                }
            }
            ConstructKind::Occurrence | ConstructKind::Variant => {
                if let Some(record) = reader.construct(id) {
                    parents.extend(record.parent());
                }
            }
        }
        for child in cascade {
            self.drop_one(child);
        }
        self.drop_one(id);
        for parent in parents {
            self.mark_touched(parent);
        }
        Ok(())
    }

    fn scope_for(&mut self, themes: &BTreeSet<ConstructId>) -> Result<ScopeId, EngineError> {
        for &theme in themes {
            self.require_topic(theme, "theme")?;
        }
        if let Some(scope) = self.reader().scope_lookup(themes) {
            return Ok(scope);
        }
        let scope = ScopeId(PROVISIONAL_SCOPE_BIT | self.alloc.raw_next());
        self.overlay.txn_scopes.insert(scope, themes.clone());
        self.overlay
            .txn_scope_canonical
            .insert(themes.clone(), scope);
        Ok(scope)
    }
}

// =============================================================================
// COMMIT
// =============================================================================

fn kind_rank(kind: ConstructKind) -> u8 {
    match kind {
        ConstructKind::Topic => 0,
        ConstructKind::Association => 1,
        ConstructKind::Name => 2,
        ConstructKind::Occurrence => 3,
        ConstructKind::Role => 4,
        ConstructKind::Variant => 5,
    }
}

/// Validate and apply one overlay against the base store, appending the
/// resulting revision. Validation runs to completion before the first
/// base mutation; a validation error leaves the base untouched and the
/// overlay reusable.
pub(crate) fn commit_overlay(
    base: &mut MemoryStore,
    overlay: &TxnOverlay,
    tag: Option<String>,
    metadata: BTreeMap<String, String>,
) -> Result<RevisionId, EngineError> {
    validate_overlay(base, overlay)?;
    let changeset = build_changeset(base, overlay);
    apply_overlay(base, overlay)?;
    let event = if overlay.merged {
        EventKind::TopicsMerged
    } else {
        EventKind::TransactionCommit
    };
    Ok(base.revisions.append(event, changeset, tag, metadata))
}

fn validate_overlay(base: &MemoryStore, overlay: &TxnOverlay) -> Result<(), EngineError> {
    let gone = |id: ConstructId| overlay.tombstones.contains(&id);
    let exists = |id: ConstructId| {
        overlay.created.contains(&id) || (base.contains(id) && !gone(id))
    };
    let require = |id: ConstructId, what: &str| {
        if exists(id) {
            Ok(())
        } else {
            Err(EngineError::ModelConstraint(format!(
                "{what} {id:?} no longer exists at commit"
            )))
        }
    };
    let scope_known = |scope: ScopeId| {
        if is_provisional(scope) {
            overlay.txn_scopes.contains_key(&scope)
        } else {
            base.themes_of(scope).is_some()
        }
    };

    // Identity collisions against the base as it stands now. The base may
    // have gained entries since the transaction began.
    for (locator, &(_, construct)) in &overlay.identity_adds {
        if let Some((_, existing)) = base.identity.entry(locator) {
            if existing != construct
                && !gone(existing)
                && !overlay.identity_removes.contains_key(locator)
            {
                return Err(EngineError::IdentityConstraint {
                    locator: locator.clone(),
                    existing,
                    candidate: construct,
                });
            }
        }
        require(construct, "identified construct")?;
    }

    // Every reference held by a record to be written must survive commit.
    for record in overlay.local.values() {
        if let Some(parent) = record.parent() {
            require(parent, "parent")?;
        }
        if let Some(type_id) = record.type_id() {
            require(type_id, "type")?;
        }
        if let Construct::Role(r) = record {
            require(r.player, "role player")?;
        }
        if let Some(scope) = record.scope() {
            if !scope_known(scope) {
                return Err(EngineError::ModelConstraint(format!(
                    "scope {scope:?} unknown at commit"
                )));
            }
            if let Some(themes) = overlay.txn_scopes.get(&scope) {
                for &theme in themes {
                    require(theme, "scope theme")?;
                }
            }
        }
    }

    for (a, b) in overlay.types.added_pairs() {
        require(a, "instance")?;
        require(b, "type")?;
    }
    for (a, b) in overlay.supertypes.added_pairs() {
        require(a, "subtype")?;
        require(b, "supertype")?;
    }

    // Reification conflicts against current base state.
    for (&reifiable, &topic) in &overlay.reif_set {
        require(reifiable, "reified construct")?;
        require(topic, "reifier")?;
        if let Some(existing) = base.reifier_of(reifiable) {
            if existing != topic && !gone(existing) && !overlay.reif_cleared.contains(&reifiable) {
                return Err(EngineError::ModelConstraint(format!(
                    "construct {reifiable:?} is already reified in the base"
                )));
            }
        }
        if let Some(existing) = base.reified_by(topic) {
            if existing != reifiable
                && !gone(existing)
                && !overlay.reif_cleared_rev.contains(&topic)
            {
                return Err(EngineError::ModelConstraint(format!(
                    "topic {topic:?} already reifies a construct in the base"
                )));
            }
        }
    }

    for id in &overlay.tombstones {
        if !base.contains(*id) {
            return Err(EngineError::ModelConstraint(format!(
                "tombstoned construct {id:?} is gone from the base"
            )));
        }
    }

    validate_removals(base, overlay)
}

/// Removal constraints are checked when `remove_construct` runs inside
/// the transaction, but the base may gain references to the tombstoned
/// construct before commit. Re-check every tombstone against the base as
/// it stands now, honouring overlay retargets, so a commit never leaves
/// a surviving record pointing at a removed construct.
fn validate_removals(base: &MemoryStore, overlay: &TxnOverlay) -> Result<(), EngineError> {
    let gone = |id: ConstructId| overlay.tombstones.contains(&id);
    // The shape a base record will have after commit, or None if it is
    // removed in this transaction.
    let effective = |id: ConstructId| -> Option<Construct> {
        if gone(id) {
            None
        } else if let Some(record) = overlay.local.get(&id) {
            Some(record.clone())
        } else {
            base.construct(id)
        }
    };
    let edge_survives = |rel: &RelOverlay, a: ConstructId, b: ConstructId| {
        !gone(a) && !rel.removed.get(&a).is_some_and(|set| set.contains(&b))
    };
    let conflict = |id: ConstructId, what: &str| {
        EngineError::ModelConstraint(format!("removed construct {id:?} {what} at commit"))
    };

    for &id in &overlay.tombstones {
        for role in base.roles_played(id) {
            if let Some(Construct::Role(r)) = effective(role) {
                if r.player == id {
                    return Err(conflict(id, "still plays a role"));
                }
            }
        }
        if base
            .instances_of(id)
            .iter()
            .any(|&instance| edge_survives(&overlay.types, instance, id))
        {
            return Err(conflict(id, "is still used as a type"));
        }
        for construct in base.typed_by(id) {
            if effective(construct).and_then(|r| r.type_id()) == Some(id) {
                return Err(conflict(id, "is still used as a type"));
            }
        }
        if base
            .subtypes_of(id)
            .iter()
            .any(|&subtype| edge_survives(&overlay.supertypes, subtype, id))
        {
            return Err(conflict(id, "is still used as a supertype"));
        }
        for scope in base.scopes_with_theme(id) {
            for construct in base.scoped_by(scope) {
                if effective(construct).and_then(|r| r.scope()) == Some(scope) {
                    return Err(conflict(id, "is still a theme of a scope in use"));
                }
            }
        }
        for child in base
            .names_of(id)
            .into_iter()
            .chain(base.occurrences_of(id))
            .chain(base.roles_of(id))
            .chain(base.variants_of(id))
        {
            if effective(child).and_then(|r| r.parent()) == Some(id) {
                return Err(conflict(id, "still owns characteristics"));
            }
        }
    }
    Ok(())
}

/// Freeze the full changeset before any base mutation, using the merged
/// view for after-images and the base for before-images.
fn build_changeset(base: &MemoryStore, overlay: &TxnOverlay) -> Changeset {
    let reader = TxnReader { base, overlay };
    let mut changeset = Changeset::new();

    let mut created: Vec<ConstructId> = overlay.created.iter().copied().collect();
    created.sort_by_key(|id| {
        let rank = overlay
            .local
            .get(id)
            .map(|r| kind_rank(r.kind()))
            .unwrap_or(u8::MAX);
        (rank, *id)
    });
    for id in created {
        let Some(kind) = reader.kind(id) else { continue };
        changeset.push(Delta {
            construct: id,
            kind,
            change: ChangeKind::Added,
            before: None,
            after: freeze(&reader, id),
        });
    }

    for &id in &overlay.touched {
        if overlay.created.contains(&id) || overlay.tombstones.contains(&id) {
            continue;
        }
        let Some(kind) = base.kind(id) else { continue };
        let before = freeze(base, id);
        let after = freeze(&reader, id);
        if before == after {
            continue;
        }
        changeset.push(Delta {
            construct: id,
            kind,
            change: ChangeKind::Modified,
            before,
            after,
        });
    }

    for &id in &overlay.tombstones {
        let Some(kind) = base.kind(id) else { continue };
        changeset.push(Delta {
            construct: id,
            kind,
            change: ChangeKind::Removed,
            before: freeze(base, id),
            after: None,
        });
    }
    changeset
}

fn apply_overlay(base: &mut MemoryStore, overlay: &TxnOverlay) -> Result<(), EngineError> {
    // Re-canonicalize provisional scopes against the base. Only scopes a
    // surviving record still references are interned; a scope that ended
    // up unused, or whose themes were dropped with it, dies with the
    // transaction.
    let used_scopes: BTreeSet<ScopeId> = overlay
        .local
        .values()
        .filter_map(Construct::scope)
        .filter(|&scope| is_provisional(scope))
        .collect();
    let mut scope_remap: BTreeMap<ScopeId, ScopeId> = BTreeMap::new();
    for (&provisional, themes) in &overlay.txn_scopes {
        if used_scopes.contains(&provisional) {
            scope_remap.insert(provisional, base.scopes.scope_for(themes));
        }
    }
    let remap = |scope: ScopeId| scope_remap.get(&scope).copied().unwrap_or(scope);
    let remapped = |record: &Construct| {
        let mut record = record.clone();
        match &mut record {
            Construct::Association(a) => a.scope = remap(a.scope),
            Construct::Name(n) => n.scope = remap(n.scope),
            Construct::Occurrence(o) => o.scope = remap(o.scope),
            Construct::Variant(v) => v.scope = remap(v.scope),
            Construct::Topic(_) | Construct::Role(_) => {}
        }
        record
    };

    let mut created: Vec<&Construct> = overlay
        .created
        .iter()
        .filter_map(|id| overlay.local.get(id))
        .collect();
    created.sort_by_key(|r| (kind_rank(r.kind()), r.id()));
    for record in created {
        base.insert_record(remapped(record))?;
    }

    for (id, record) in &overlay.local {
        if overlay.created.contains(id) {
            continue;
        }
        base.replace_record(remapped(record))?;
    }

    let gone = |id: ConstructId| overlay.tombstones.contains(&id);
    for (a, b) in overlay.types.removed_pairs() {
        base.characteristics.remove_type(a, b);
    }
    for (a, b) in overlay.types.added_pairs() {
        if !gone(a) && !gone(b) {
            base.characteristics.add_type(a, b);
        }
    }
    for (a, b) in overlay.supertypes.removed_pairs() {
        base.characteristics.remove_supertype(a, b);
    }
    for (a, b) in overlay.supertypes.added_pairs() {
        if !gone(a) && !gone(b) {
            base.characteristics.add_supertype(a, b);
        }
    }

    // Tombstoned constructs give up their locators and reification pairs
    // before new claims are registered, so a locator or reifier can move
    // across a removal in one commit.
    for &id in &overlay.tombstones {
        base.identity.remove_construct(id);
        base.reification.clear_by_reifiable(id);
        base.reification.clear_by_topic(id);
    }
    for (locator, &(kind, construct)) in &overlay.identity_removes {
        base.identity.unregister(construct, kind, locator);
    }
    for (locator, &(kind, construct)) in &overlay.identity_adds {
        base.identity.register(construct, kind, locator.clone())?;
    }

    for &reifiable in &overlay.reif_cleared {
        base.reification.clear_by_reifiable(reifiable);
    }
    for (&reifiable, &topic) in &overlay.reif_set {
        if !gone(reifiable) && !gone(topic) {
            base.reification.set(reifiable, topic)?;
        }
    }

    for &id in &overlay.tombstones {
        base.remove_record_forced(id);
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

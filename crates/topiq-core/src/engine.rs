//! # Topic Map Engine
//!
//! [`TopicMapEngine`] owns the base store, the shared id allocator and
//! every open transaction overlay. All operations take a [`View`]
//! selecting the base store or one transaction; the same operation has
//! the same semantics in either view.
//!
//! Base-view mutations apply immediately and produce no revision.
//! Transactions are begun with [`TopicMapEngine::begin`], committed as
//! one atomic step that appends a revision, or discarded with
//! [`TopicMapEngine::close`].

use crate::merge;
use crate::model::{Construct, IdentifierSets};
use crate::overlay::{commit_overlay, TxnOverlay, TxnReader, TxnStore};
use crate::revision::{FrozenRef, ResolvedRef, Revision, RevisionLog};
use crate::store::{BaseStore, IdAllocator, MemoryStore};
use crate::types::{
    ConstructId, ConstructKind, EngineError, IdentifierKind, Locator, RevisionId, ScopeId, TxnId,
};
use crate::{LiteralValue, StoreReads, StoreView};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Which state an operation runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// The shared base store; mutations apply immediately.
    Base,
    /// One open transaction's isolated overlay view.
    Txn(TxnId),
}

/// Handle to one open transaction. Obtained from
/// [`TopicMapEngine::begin`] and consumed by commit or close.
#[derive(Debug, PartialEq, Eq)]
pub struct Transaction {
    id: TxnId,
}

impl Transaction {
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// The view selecting this transaction.
    #[must_use]
    pub fn view(&self) -> View {
        View::Txn(self.id)
    }
}

/// The engine for one topic map.
#[derive(Debug)]
pub struct TopicMapEngine {
    pub(crate) base: MemoryStore,
    pub(crate) alloc: IdAllocator,
    txns: BTreeMap<TxnId, TxnOverlay>,
    next_txn: u64,
}

impl TopicMapEngine {
    /// Create an empty engine for a map identified by `base_locator`.
    #[must_use]
    pub fn new(base_locator: Locator) -> Self {
        Self {
            base: MemoryStore::new(base_locator),
            alloc: IdAllocator::new(),
            txns: BTreeMap::new(),
            next_txn: 1,
        }
    }

    pub(crate) fn from_parts(base: MemoryStore, alloc: IdAllocator) -> Self {
        Self {
            base,
            alloc,
            txns: BTreeMap::new(),
            next_txn: 1,
        }
    }

    #[must_use]
    pub fn base_locator(&self) -> &Locator {
        self.base.base_locator()
    }

    /// The committed base store. Committed state only; open overlays are
    /// not visible here.
    #[must_use]
    pub fn store(&self) -> &MemoryStore {
        &self.base
    }

    // =========================================================================
    // TRANSACTION LIFECYCLE
    // =========================================================================

    /// Open a new transaction over the current base.
    pub fn begin(&mut self) -> Transaction {
        let id = TxnId(self.next_txn);
        self.next_txn = self.next_txn.saturating_add(1);
        self.txns.insert(id, TxnOverlay::new());
        Transaction { id }
    }

    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.txns.len()
    }

    /// Commit a transaction: validate, apply atomically, append a
    /// revision. On a validation error the transaction stays open (and
    /// can be closed or retried) and the base store is untouched.
    pub fn commit(&mut self, txn: &Transaction) -> Result<RevisionId, EngineError> {
        self.commit_with(txn, None, BTreeMap::new())
    }

    /// As [`commit`](Self::commit), attaching a tag and metadata to the
    /// revision.
    pub fn commit_tagged(
        &mut self,
        txn: &Transaction,
        tag: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<RevisionId, EngineError> {
        self.commit_with(txn, Some(tag.into()), metadata)
    }

    fn commit_with(
        &mut self,
        txn: &Transaction,
        tag: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<RevisionId, EngineError> {
        let overlay = self
            .txns
            .remove(&txn.id)
            .ok_or(EngineError::UnknownTransaction(txn.id))?;
        match commit_overlay(&mut self.base, &overlay, tag, metadata) {
            Ok(revision) => Ok(revision),
            Err(err) => {
                self.txns.insert(txn.id, overlay);
                Err(err)
            }
        }
    }

    /// Discard a transaction; the base store is untouched.
    pub fn close(&mut self, txn: &Transaction) -> Result<(), EngineError> {
        self.txns
            .remove(&txn.id)
            .map(|_| ())
            .ok_or(EngineError::UnknownTransaction(txn.id))
    }

    // =========================================================================
    // VIEW DISPATCH
    // =========================================================================

    fn with_store<R>(
        &mut self,
        view: View,
        f: impl FnOnce(&mut dyn StoreView) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        match view {
            View::Base => {
                let mut store = BaseStore {
                    store: &mut self.base,
                    alloc: &mut self.alloc,
                };
                f(&mut store)
            }
            View::Txn(id) => {
                let overlay = self
                    .txns
                    .get_mut(&id)
                    .ok_or(EngineError::UnknownTransaction(id))?;
                let mut store = TxnStore {
                    base: &self.base,
                    overlay,
                    alloc: &mut self.alloc,
                };
                f(&mut store)
            }
        }
    }

    fn with_reads<R>(
        &self,
        view: View,
        f: impl FnOnce(&dyn StoreReads) -> R,
    ) -> Result<R, EngineError> {
        match view {
            View::Base => Ok(f(&self.base)),
            View::Txn(id) => {
                let overlay = self
                    .txns
                    .get(&id)
                    .ok_or(EngineError::UnknownTransaction(id))?;
                let reader = TxnReader {
                    base: &self.base,
                    overlay,
                };
                Ok(f(&reader))
            }
        }
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    pub fn create_topic(&mut self, view: View) -> Result<ConstructId, EngineError> {
        self.with_store(view, |s| s.create_topic())
    }

    pub fn create_association(
        &mut self,
        view: View,
        type_id: ConstructId,
        scope: ScopeId,
    ) -> Result<ConstructId, EngineError> {
        self.with_store(view, |s| s.create_association(type_id, scope))
    }

    pub fn create_role(
        &mut self,
        view: View,
        association: ConstructId,
        type_id: ConstructId,
        player: ConstructId,
    ) -> Result<ConstructId, EngineError> {
        self.with_store(view, |s| s.create_role(association, type_id, player))
    }

    pub fn create_name(
        &mut self,
        view: View,
        topic: ConstructId,
        type_id: ConstructId,
        scope: ScopeId,
        value: impl Into<String>,
    ) -> Result<ConstructId, EngineError> {
        let value = value.into();
        self.with_store(view, |s| s.create_name(topic, type_id, scope, value))
    }

    pub fn create_occurrence(
        &mut self,
        view: View,
        topic: ConstructId,
        type_id: ConstructId,
        scope: ScopeId,
        value: LiteralValue,
    ) -> Result<ConstructId, EngineError> {
        self.with_store(view, |s| s.create_occurrence(topic, type_id, scope, value))
    }

    pub fn create_variant(
        &mut self,
        view: View,
        name: ConstructId,
        scope: ScopeId,
        value: LiteralValue,
    ) -> Result<ConstructId, EngineError> {
        self.with_store(view, |s| s.create_variant(name, scope, value))
    }

    // =========================================================================
    // IDENTITY
    // =========================================================================

    pub fn add_identifier(
        &mut self,
        view: View,
        construct: ConstructId,
        kind: IdentifierKind,
        locator: Locator,
    ) -> Result<(), EngineError> {
        self.with_store(view, |s| s.add_identifier(construct, kind, locator))
    }

    pub fn remove_identifier(
        &mut self,
        view: View,
        construct: ConstructId,
        kind: IdentifierKind,
        locator: &Locator,
    ) -> Result<(), EngineError> {
        self.with_store(view, |s| s.remove_identifier(construct, kind, locator))
    }

    pub fn resolve(&self, view: View, locator: &Locator) -> Result<Option<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.resolve(locator))
    }

    pub fn identifiers_of(
        &self,
        view: View,
        construct: ConstructId,
    ) -> Result<IdentifierSets, EngineError> {
        self.with_reads(view, |r| r.identifiers_of(construct))
    }

    // =========================================================================
    // STRUCTURE EDITS
    // =========================================================================

    pub fn add_type(
        &mut self,
        view: View,
        topic: ConstructId,
        type_topic: ConstructId,
    ) -> Result<(), EngineError> {
        self.with_store(view, |s| s.add_type(topic, type_topic))
    }

    pub fn remove_type(
        &mut self,
        view: View,
        topic: ConstructId,
        type_topic: ConstructId,
    ) -> Result<(), EngineError> {
        self.with_store(view, |s| s.remove_type(topic, type_topic))
    }

    pub fn add_supertype(
        &mut self,
        view: View,
        topic: ConstructId,
        supertype: ConstructId,
    ) -> Result<(), EngineError> {
        self.with_store(view, |s| s.add_supertype(topic, supertype))
    }

    pub fn remove_supertype(
        &mut self,
        view: View,
        topic: ConstructId,
        supertype: ConstructId,
    ) -> Result<(), EngineError> {
        self.with_store(view, |s| s.remove_supertype(topic, supertype))
    }

    pub fn set_type(
        &mut self,
        view: View,
        construct: ConstructId,
        type_topic: ConstructId,
    ) -> Result<(), EngineError> {
        self.with_store(view, |s| s.set_type(construct, type_topic))
    }

    pub fn set_scope(
        &mut self,
        view: View,
        construct: ConstructId,
        scope: ScopeId,
    ) -> Result<(), EngineError> {
        self.with_store(view, |s| s.set_scope(construct, scope))
    }

    pub fn set_name_value(
        &mut self,
        view: View,
        name: ConstructId,
        value: impl Into<String>,
    ) -> Result<(), EngineError> {
        let value = value.into();
        self.with_store(view, |s| s.set_name_value(name, value))
    }

    pub fn set_literal(
        &mut self,
        view: View,
        construct: ConstructId,
        value: LiteralValue,
    ) -> Result<(), EngineError> {
        self.with_store(view, |s| s.set_literal(construct, value))
    }

    pub fn set_player(
        &mut self,
        view: View,
        role: ConstructId,
        player: ConstructId,
    ) -> Result<(), EngineError> {
        self.with_store(view, |s| s.set_player(role, player))
    }

    pub fn set_reifier(
        &mut self,
        view: View,
        construct: ConstructId,
        reifier: Option<ConstructId>,
    ) -> Result<(), EngineError> {
        self.with_store(view, |s| s.set_reifier(construct, reifier))
    }

    pub fn reparent(
        &mut self,
        view: View,
        construct: ConstructId,
        new_parent: ConstructId,
    ) -> Result<(), EngineError> {
        self.with_store(view, |s| s.reparent(construct, new_parent))
    }

    pub fn remove_construct(&mut self, view: View, id: ConstructId) -> Result<(), EngineError> {
        self.with_store(view, |s| s.remove_construct(id))
    }

    pub fn scope_for(
        &mut self,
        view: View,
        themes: &BTreeSet<ConstructId>,
    ) -> Result<ScopeId, EngineError> {
        self.with_store(view, |s| s.scope_for(themes))
    }

    // =========================================================================
    // MERGE
    // =========================================================================

    /// Merge `doomed` into `keep` in the given view. Inside a transaction
    /// the merge stays isolated until commit, and the commit's revision is
    /// marked as a merge event.
    pub fn merge_topics(
        &mut self,
        view: View,
        keep: ConstructId,
        doomed: ConstructId,
    ) -> Result<(), EngineError> {
        self.with_store(view, |s| merge::merge_topics(s, keep, doomed))?;
        if let View::Txn(id) = view {
            if let Some(overlay) = self.txns.get_mut(&id) {
                overlay.merged = true;
            }
        }
        Ok(())
    }

    /// Replace `other` with `topic` (see [`merge::replace_topic`]).
    pub fn replace_topic(
        &mut self,
        view: View,
        topic: ConstructId,
        other: ConstructId,
    ) -> Result<(), EngineError> {
        self.with_store(view, |s| merge::replace_topic(s, topic, other))?;
        if let View::Txn(id) = view {
            if let Some(overlay) = self.txns.get_mut(&id) {
                overlay.merged = true;
            }
        }
        Ok(())
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn kind(&self, view: View, id: ConstructId) -> Result<Option<ConstructKind>, EngineError> {
        self.with_reads(view, |r| r.kind(id))
    }

    pub fn construct(&self, view: View, id: ConstructId) -> Result<Option<Construct>, EngineError> {
        self.with_reads(view, |r| r.construct(id))
    }

    pub fn contains(&self, view: View, id: ConstructId) -> Result<bool, EngineError> {
        self.with_reads(view, |r| r.contains(id))
    }

    pub fn names_of(&self, view: View, topic: ConstructId) -> Result<Vec<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.names_of(topic))
    }

    pub fn occurrences_of(
        &self,
        view: View,
        topic: ConstructId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.occurrences_of(topic))
    }

    pub fn variants_of(&self, view: View, name: ConstructId) -> Result<Vec<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.variants_of(name))
    }

    pub fn roles_of(
        &self,
        view: View,
        association: ConstructId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.roles_of(association))
    }

    pub fn roles_played(
        &self,
        view: View,
        topic: ConstructId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.roles_played(topic))
    }

    pub fn types_of(&self, view: View, topic: ConstructId) -> Result<Vec<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.types_of(topic))
    }

    pub fn instances_of(
        &self,
        view: View,
        type_topic: ConstructId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.instances_of(type_topic))
    }

    pub fn supertypes_of(
        &self,
        view: View,
        topic: ConstructId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.supertypes_of(topic))
    }

    pub fn subtypes_of(
        &self,
        view: View,
        topic: ConstructId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.subtypes_of(topic))
    }

    pub fn typed_by(
        &self,
        view: View,
        type_topic: ConstructId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.typed_by(type_topic))
    }

    pub fn themes_of(
        &self,
        view: View,
        scope: ScopeId,
    ) -> Result<Option<BTreeSet<ConstructId>>, EngineError> {
        self.with_reads(view, |r| r.themes_of(scope))
    }

    pub fn scoped_by(&self, view: View, scope: ScopeId) -> Result<Vec<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.scoped_by(scope))
    }

    pub fn scopes_with_theme(
        &self,
        view: View,
        topic: ConstructId,
    ) -> Result<Vec<ScopeId>, EngineError> {
        self.with_reads(view, |r| r.scopes_with_theme(topic))
    }

    pub fn scope_lookup(
        &self,
        view: View,
        themes: &BTreeSet<ConstructId>,
    ) -> Result<Option<ScopeId>, EngineError> {
        self.with_reads(view, |r| r.scope_lookup(themes))
    }

    pub fn reifier_of(
        &self,
        view: View,
        reifiable: ConstructId,
    ) -> Result<Option<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.reifier_of(reifiable))
    }

    pub fn reified_by(
        &self,
        view: View,
        topic: ConstructId,
    ) -> Result<Option<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.reified_by(topic))
    }

    pub fn topics(&self, view: View) -> Result<Vec<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.topics())
    }

    pub fn associations(&self, view: View) -> Result<Vec<ConstructId>, EngineError> {
        self.with_reads(view, |r| r.associations())
    }

    // =========================================================================
    // HISTORY
    // =========================================================================

    #[must_use]
    pub fn revision_log(&self) -> &RevisionLog {
        self.base.revision_log()
    }

    #[must_use]
    pub fn revision(&self, id: RevisionId) -> Option<&Revision> {
        self.base.revision_log().get(id)
    }

    #[must_use]
    pub fn revision_by_tag(&self, tag: &str) -> Option<&Revision> {
        self.base.revision_log().by_tag(tag)
    }

    #[must_use]
    pub fn revision_by_timestamp(&self, at: DateTime<Utc>) -> Option<&Revision> {
        self.base.revision_log().by_timestamp(at)
    }

    /// Long-lived handle to a construct; resolvable after removal.
    #[must_use]
    pub fn frozen_ref(&self, id: ConstructId) -> FrozenRef {
        FrozenRef::new(id)
    }

    /// Resolve a frozen handle against the current committed state.
    #[must_use]
    pub fn resolve_ref<'a>(&self, handle: &'a FrozenRef) -> Option<ResolvedRef<'a>> {
        handle.resolve(&self.base)
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

    fn engine() -> TopicMapEngine {
        TopicMapEngine::new(loc("http://example.org/map"))
    }

    #[test]
    fn base_edits_apply_immediately_without_revision() {
        let mut eng = engine();
        let topic = eng.create_topic(View::Base).expect("create");

        assert!(eng.contains(View::Base, topic).expect("read"));
        assert!(eng.revision_log().is_empty());
    }

    #[test]
    fn transaction_isolated_until_commit() {
        let mut eng = engine();
        let txn = eng.begin();
        let topic = eng.create_topic(txn.view()).expect("create");

        assert!(!eng.contains(View::Base, topic).expect("read"));
        assert!(eng.contains(txn.view(), topic).expect("read"));

        let revision = eng.commit(&txn).expect("commit");
        assert!(eng.contains(View::Base, topic).expect("read"));
        assert_eq!(eng.revision_log().last().map(|r| r.id), Some(revision));
    }

    #[test]
    fn close_discards_without_trace() {
        let mut eng = engine();
        let txn = eng.begin();
        let topic = eng.create_topic(txn.view()).expect("create");
        let view = txn.view();

        eng.close(&txn).expect("close");

        assert!(!eng.contains(View::Base, topic).expect("read"));
        assert!(eng.revision_log().is_empty());
        assert_eq!(
            eng.contains(view, topic),
            Err(EngineError::UnknownTransaction(match view {
                View::Txn(id) => id,
                View::Base => TxnId(0),
            }))
        );
    }

    #[test]
    fn unknown_transaction_rejected() {
        let mut eng = engine();
        let stale = Transaction { id: TxnId(99) };
        assert_eq!(
            eng.commit(&stale),
            Err(EngineError::UnknownTransaction(TxnId(99)))
        );
    }

    #[test]
    fn concurrent_overlays_are_independent() {
        let mut eng = engine();
        let t1 = eng.begin();
        let t2 = eng.begin();

        let a = eng.create_topic(t1.view()).expect("create");
        let b = eng.create_topic(t2.view()).expect("create");

        assert!(!eng.contains(t1.view(), b).expect("read"));
        assert!(!eng.contains(t2.view(), a).expect("read"));

        eng.commit(&t1).expect("commit");
        // t2 sees the newly committed base fact.
        assert!(eng.contains(t2.view(), a).expect("read"));
        eng.close(&t2).expect("close");
    }

    #[test]
    fn merge_inside_transaction_marks_revision() {
        let mut eng = engine();
        let keep = eng.create_topic(View::Base).expect("create");
        let doomed = eng.create_topic(View::Base).expect("create");
        eng.add_identifier(
            View::Base,
            doomed,
            IdentifierKind::SubjectIdentifier,
            loc("u:d"),
        )
        .expect("identify");

        let txn = eng.begin();
        eng.merge_topics(txn.view(), keep, doomed).expect("merge");

        // Isolated: base still has both.
        assert!(eng.contains(View::Base, doomed).expect("read"));

        let revision = eng.commit(&txn).expect("commit");
        assert!(!eng.contains(View::Base, doomed).expect("read"));
        assert_eq!(eng.resolve(View::Base, &loc("u:d")).expect("read"), Some(keep));
        assert_eq!(
            eng.revision(revision).map(|r| r.kind),
            Some(crate::revision::EventKind::TopicsMerged)
        );
    }

    #[test]
    fn failed_commit_keeps_transaction_open() {
        let mut eng = engine();
        let holder = eng.create_topic(View::Base).expect("create");

        let txn = eng.begin();
        let newcomer = eng.create_topic(txn.view()).expect("create");
        eng.add_identifier(
            txn.view(),
            newcomer,
            IdentifierKind::SubjectIdentifier,
            loc("u:x"),
        )
        .expect("identify");

        // Base claims the locator behind the transaction's back.
        eng.add_identifier(
            View::Base,
            holder,
            IdentifierKind::SubjectIdentifier,
            loc("u:x"),
        )
        .expect("identify");

        let err = eng.commit(&txn).expect_err("collision");
        assert!(matches!(err, EngineError::IdentityConstraint { .. }));
        assert_eq!(eng.open_transactions(), 1);
    }

    #[test]
    fn frozen_ref_survives_removal() {
        let mut eng = engine();
        let txn = eng.begin();
        let topic = eng.create_topic(txn.view()).expect("create");
        eng.commit(&txn).expect("commit");

        let handle = eng.frozen_ref(topic);
        assert!(matches!(
            eng.resolve_ref(&handle),
            Some(ResolvedRef::Live(_))
        ));

        let txn = eng.begin();
        eng.remove_construct(txn.view(), topic).expect("remove");
        eng.commit(&txn).expect("commit");

        assert!(matches!(
            eng.resolve_ref(&handle),
            Some(ResolvedRef::Frozen(_))
        ));
    }
}

//! # Scope Store
//!
//! Canonical theme-set interning plus the scope → scoped-construct index.
//!
//! Equal theme sets share one `ScopeId`; the unconstrained scope (empty
//! set) is `ScopeId(0)` and exists from construction. Scopes are interned
//! forever — a scope that no longer scopes anything keeps its id, so
//! canonicalization can never observe two ids for one theme set.

use crate::types::{ConstructId, ScopeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Theme-set interning and scoped-construct indexing for one map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeStore {
    /// ScopeId -> theme set.
    themes: BTreeMap<ScopeId, BTreeSet<ConstructId>>,
    /// Canonical map: theme set -> the one ScopeId for it.
    canonical: BTreeMap<BTreeSet<ConstructId>, ScopeId>,
    /// Scope -> constructs currently scoped by it.
    scoped_by: BTreeMap<ScopeId, BTreeSet<ConstructId>>,
    /// Theme topic -> scopes whose theme set contains it.
    by_theme: BTreeMap<ConstructId, BTreeSet<ScopeId>>,
    /// Next scope id to intern.
    next: u64,
}

impl ScopeStore {
    #[must_use]
    pub fn new() -> Self {
        let mut store = Self {
            themes: BTreeMap::new(),
            canonical: BTreeMap::new(),
            scoped_by: BTreeMap::new(),
            by_theme: BTreeMap::new(),
            next: 1,
        };
        store.themes.insert(ScopeId::UNCONSTRAINED, BTreeSet::new());
        store.canonical.insert(BTreeSet::new(), ScopeId::UNCONSTRAINED);
        store
    }

    /// The canonical scope for a theme set, interning it on first sight.
    pub fn scope_for(&mut self, themes: &BTreeSet<ConstructId>) -> ScopeId {
        if let Some(&id) = self.canonical.get(themes) {
            return id;
        }
        let id = ScopeId(self.next);
        self.next = self.next.saturating_add(1);
        self.themes.insert(id, themes.clone());
        self.canonical.insert(themes.clone(), id);
        for &theme in themes {
            self.by_theme.entry(theme).or_default().insert(id);
        }
        id
    }

    /// Look up a theme set without interning.
    #[must_use]
    pub fn lookup(&self, themes: &BTreeSet<ConstructId>) -> Option<ScopeId> {
        self.canonical.get(themes).copied()
    }

    /// The theme set of a scope, if the scope is known.
    #[must_use]
    pub fn themes_of(&self, scope: ScopeId) -> Option<BTreeSet<ConstructId>> {
        self.themes.get(&scope).cloned()
    }

    /// Whether the scope id is interned.
    #[must_use]
    pub fn contains(&self, scope: ScopeId) -> bool {
        self.themes.contains_key(&scope)
    }

    /// Record that a construct is scoped by `scope`.
    pub fn add_scoped(&mut self, scope: ScopeId, construct: ConstructId) {
        self.scoped_by.entry(scope).or_default().insert(construct);
    }

    /// Drop the scope ↔ construct link.
    pub fn remove_scoped(&mut self, scope: ScopeId, construct: ConstructId) {
        if let Some(set) = self.scoped_by.get_mut(&scope) {
            set.remove(&construct);
            if set.is_empty() {
                self.scoped_by.remove(&scope);
            }
        }
    }

    /// Constructs scoped by a scope, in id order.
    #[must_use]
    pub fn scoped_by(&self, scope: ScopeId) -> Vec<ConstructId> {
        self.scoped_by
            .get(&scope)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Scopes whose theme set contains the topic, in id order.
    #[must_use]
    pub fn scopes_with_theme(&self, topic: ConstructId) -> Vec<ScopeId> {
        self.by_theme
            .get(&topic)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Replace `old` with `new` in every theme set containing it (merge).
    ///
    /// Returns the remap from retired scope ids to their canonical
    /// replacements; the caller rewrites the scope field of every affected
    /// construct. The retired ids stay interned for their original theme
    /// sets but no longer index any scoped construct.
    pub fn substitute_theme(
        &mut self,
        old: ConstructId,
        new: ConstructId,
    ) -> BTreeMap<ScopeId, ScopeId> {
        let mut remap = BTreeMap::new();
        let affected = self.scopes_with_theme(old);
        for scope in affected {
            let Some(themes) = self.themes_of(scope) else {
                continue;
            };
            let mut replacement: BTreeSet<ConstructId> =
                themes.into_iter().filter(|&t| t != old).collect();
            replacement.insert(new);
            let target = self.scope_for(&replacement);
            if target != scope {
                remap.insert(scope, target);
            }
        }
        // The old topic no longer appears as a theme of any live scope use;
        // retire its by_theme entry so merged topics stop indexing scopes.
        self.by_theme.remove(&old);
        remap
    }
}

impl Default for ScopeStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_is_unconstrained() {
        let mut store = ScopeStore::new();
        assert_eq!(store.scope_for(&BTreeSet::new()), ScopeId::UNCONSTRAINED);
    }

    #[test]
    fn equal_theme_sets_share_one_scope() {
        let mut store = ScopeStore::new();
        let a: BTreeSet<_> = [ConstructId(1), ConstructId(2)].into_iter().collect();
        let b: BTreeSet<_> = [ConstructId(2), ConstructId(1)].into_iter().collect();

        let s1 = store.scope_for(&a);
        let s2 = store.scope_for(&b);

        assert_eq!(s1, s2);
        assert_eq!(store.themes_of(s1), Some(a));
    }

    #[test]
    fn distinct_sets_get_distinct_scopes() {
        let mut store = ScopeStore::new();
        let s1 = store.scope_for(&[ConstructId(1)].into_iter().collect());
        let s2 = store.scope_for(&[ConstructId(2)].into_iter().collect());
        assert_ne!(s1, s2);
    }

    #[test]
    fn scoped_index_tracks_membership() {
        let mut store = ScopeStore::new();
        let scope = store.scope_for(&[ConstructId(1)].into_iter().collect());
        store.add_scoped(scope, ConstructId(10));
        store.add_scoped(scope, ConstructId(11));

        assert_eq!(store.scoped_by(scope), vec![ConstructId(10), ConstructId(11)]);

        store.remove_scoped(scope, ConstructId(10));
        assert_eq!(store.scoped_by(scope), vec![ConstructId(11)]);
    }

    #[test]
    fn substitute_theme_recanonicalizes() {
        let mut store = ScopeStore::new();
        let old_scope = store.scope_for(&[ConstructId(1), ConstructId(3)].into_iter().collect());

        let remap = store.substitute_theme(ConstructId(3), ConstructId(2));

        let target = remap.get(&old_scope).copied().expect("remapped");
        assert_eq!(
            store.themes_of(target),
            Some([ConstructId(1), ConstructId(2)].into_iter().collect())
        );
        assert!(store.scopes_with_theme(ConstructId(3)).is_empty());
    }

    #[test]
    fn substitute_into_existing_scope_reuses_it() {
        let mut store = ScopeStore::new();
        let merged_form = store.scope_for(&[ConstructId(1)].into_iter().collect());
        let old_scope = store.scope_for(&[ConstructId(9)].into_iter().collect());

        let remap = store.substitute_theme(ConstructId(9), ConstructId(1));

        assert_eq!(remap.get(&old_scope), Some(&merged_form));
    }
}

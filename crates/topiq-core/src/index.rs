//! # Query Indexes & Concurrency Wrapper
//!
//! Query surfaces over the committed base store. Every index must be
//! explicitly opened before use; queries against a closed index fail
//! with `IndexClosed`. The indexes hold no copied state — they are
//! gatekept query facades over the store's own adjacency, so they never
//! go stale.
//!
//! [`ConcurrentTopicMap`] is the sharing wrapper: one blocking
//! `std::sync::Mutex` around the engine, released on every exit path,
//! poisoned locks recovered rather than panicked on.

use crate::model::Construct;
use crate::primitives::MAX_TYPE_DEPTH;
use crate::store::{apply_page, MemoryStore, Page};
use crate::types::{ConstructId, EngineError, Locator, ScopeId};
use crate::{StoreReads, TopicMapEngine};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

macro_rules! gated_index {
    ($name:ident, $label:literal) => {
        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self { open: false }
            }

            /// Make the index queryable.
            pub fn open(&mut self) {
                self.open = true;
            }

            pub fn close(&mut self) {
                self.open = false;
            }

            #[must_use]
            pub fn is_open(&self) -> bool {
                self.open
            }

            fn ensure_open(&self) -> Result<(), EngineError> {
                if self.open {
                    Ok(())
                } else {
                    Err(EngineError::IndexClosed($label))
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

// =============================================================================
// TYPE-INSTANCE INDEX
// =============================================================================

/// Topics by type, typed constructs by type.
#[derive(Debug)]
pub struct TypeInstanceIndex {
    open: bool,
}

gated_index!(TypeInstanceIndex, "type-instance");

impl TypeInstanceIndex {
    pub fn instances(
        &self,
        store: &MemoryStore,
        type_topic: ConstructId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.ensure_open()?;
        Ok(store.instances_of(type_topic))
    }

    pub fn instances_paged(
        &self,
        store: &MemoryStore,
        type_topic: ConstructId,
        page: Page,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.ensure_open()?;
        Ok(apply_page(store.instances_of(type_topic), Some(page)))
    }

    pub fn types(
        &self,
        store: &MemoryStore,
        topic: ConstructId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.ensure_open()?;
        Ok(store.types_of(topic))
    }

    /// Typed constructs (associations, roles, names, occurrences).
    pub fn typed_constructs(
        &self,
        store: &MemoryStore,
        type_topic: ConstructId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.ensure_open()?;
        Ok(store.typed_by(type_topic))
    }

    /// Typed constructs ordered by a caller-supplied comparator, then id
    /// for determinism, then paged.
    pub fn typed_constructs_ordered(
        &self,
        store: &MemoryStore,
        type_topic: ConstructId,
        page: Page,
        cmp: &dyn Fn(&Construct, &Construct) -> Ordering,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.ensure_open()?;
        let mut records: Vec<Construct> = store
            .typed_by(type_topic)
            .into_iter()
            .filter_map(|id| store.construct(id))
            .collect();
        records.sort_by(|a, b| cmp(a, b).then_with(|| a.id().cmp(&b.id())));
        Ok(apply_page(
            records.into_iter().map(|c| c.id()).collect(),
            Some(page),
        ))
    }
}

// =============================================================================
// SCOPED INDEX
// =============================================================================

/// Scoped constructs by scope and by theme.
#[derive(Debug)]
pub struct ScopedIndex {
    open: bool,
}

gated_index!(ScopedIndex, "scoped");

impl ScopedIndex {
    pub fn scoped(
        &self,
        store: &MemoryStore,
        scope: ScopeId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.ensure_open()?;
        Ok(store.scoped_by(scope))
    }

    pub fn scoped_paged(
        &self,
        store: &MemoryStore,
        scope: ScopeId,
        page: Page,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.ensure_open()?;
        Ok(apply_page(store.scoped_by(scope), Some(page)))
    }

    /// Every scope whose theme set contains the topic.
    pub fn scopes_with_theme(
        &self,
        store: &MemoryStore,
        topic: ConstructId,
    ) -> Result<Vec<ScopeId>, EngineError> {
        self.ensure_open()?;
        Ok(store.scopes_with_theme(topic))
    }

    /// Constructs scoped by any scope containing the theme.
    pub fn scoped_with_theme(
        &self,
        store: &MemoryStore,
        topic: ConstructId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.ensure_open()?;
        let mut out = BTreeSet::new();
        for scope in store.scopes_with_theme(topic) {
            out.extend(store.scoped_by(scope));
        }
        Ok(out.into_iter().collect())
    }
}

// =============================================================================
// LITERAL INDEX
// =============================================================================

/// Names, occurrences and variants by string value or datatype.
#[derive(Debug)]
pub struct LiteralIndex {
    open: bool,
}

gated_index!(LiteralIndex, "literal");

impl LiteralIndex {
    pub fn by_value(
        &self,
        store: &MemoryStore,
        value: &str,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.ensure_open()?;
        Ok(store
            .records()
            .filter(|record| match record {
                Construct::Name(n) => n.value == value,
                Construct::Occurrence(o) => o.value.value == value,
                Construct::Variant(v) => v.value.value == value,
                _ => false,
            })
            .map(Construct::id)
            .collect())
    }

    pub fn by_value_paged(
        &self,
        store: &MemoryStore,
        value: &str,
        page: Page,
    ) -> Result<Vec<ConstructId>, EngineError> {
        Ok(apply_page(self.by_value(store, value)?, Some(page)))
    }

    /// Occurrences and variants whose literal carries the datatype IRI.
    pub fn by_datatype(
        &self,
        store: &MemoryStore,
        datatype: &str,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.ensure_open()?;
        Ok(store
            .records()
            .filter(|record| match record {
                Construct::Occurrence(o) => o.value.datatype.as_str() == datatype,
                Construct::Variant(v) => v.value.datatype.as_str() == datatype,
                _ => false,
            })
            .map(Construct::id)
            .collect())
    }
}

// =============================================================================
// IDENTITY INDEX
// =============================================================================

/// Constructs by locator, across all three identifier namespaces.
#[derive(Debug)]
pub struct IdentityIndex {
    open: bool,
}

gated_index!(IdentityIndex, "identity");

impl IdentityIndex {
    pub fn resolve(
        &self,
        store: &MemoryStore,
        locator: &Locator,
    ) -> Result<Option<ConstructId>, EngineError> {
        self.ensure_open()?;
        Ok(store.resolve(locator))
    }

    pub fn identifiers_of(
        &self,
        store: &MemoryStore,
        construct: ConstructId,
    ) -> Result<crate::model::IdentifierSets, EngineError> {
        self.ensure_open()?;
        Ok(store.identifiers_of(construct))
    }
}

// =============================================================================
// SUPERTYPE-SUBTYPE INDEX
// =============================================================================

/// Supertype/subtype queries, direct and transitive. Transitive walks
/// are depth-bounded so a cyclic hierarchy cannot loop.
#[derive(Debug)]
pub struct SupertypeSubtypeIndex {
    open: bool,
}

gated_index!(SupertypeSubtypeIndex, "supertype-subtype");

impl SupertypeSubtypeIndex {
    pub fn supertypes(
        &self,
        store: &MemoryStore,
        topic: ConstructId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.ensure_open()?;
        Ok(store.supertypes_of(topic))
    }

    pub fn subtypes(
        &self,
        store: &MemoryStore,
        topic: ConstructId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.ensure_open()?;
        Ok(store.subtypes_of(topic))
    }

    pub fn supertypes_transitive(
        &self,
        store: &MemoryStore,
        topic: ConstructId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.ensure_open()?;
        Ok(transitive(topic, |id| store.supertypes_of(id)))
    }

    pub fn subtypes_transitive(
        &self,
        store: &MemoryStore,
        topic: ConstructId,
    ) -> Result<Vec<ConstructId>, EngineError> {
        self.ensure_open()?;
        Ok(transitive(topic, |id| store.subtypes_of(id)))
    }
}

fn transitive(
    start: ConstructId,
    step: impl Fn(ConstructId) -> Vec<ConstructId>,
) -> Vec<ConstructId> {
    let mut seen = BTreeSet::new();
    let mut frontier = vec![start];
    for _ in 0..MAX_TYPE_DEPTH {
        let mut next = Vec::new();
        for id in frontier {
            for neighbor in step(id) {
                if neighbor != start && seen.insert(neighbor) {
                    next.push(neighbor);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    seen.into_iter().collect()
}

// =============================================================================
// CONCURRENT WRAPPER
// =============================================================================

/// Thread-safe handle to one engine: a blocking mutex, no spinning.
///
/// Each call locks for its own duration; the guard is released on every
/// exit path. A poisoned lock (a panic on another thread while holding
/// it) is recovered: the engine's state is valid at every method
/// boundary, so the poison flag carries no information here.
#[derive(Debug, Clone)]
pub struct ConcurrentTopicMap {
    inner: Arc<Mutex<TopicMapEngine>>,
}

impl ConcurrentTopicMap {
    #[must_use]
    pub fn new(engine: TopicMapEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    #[must_use]
    pub fn with_locator(base_locator: Locator) -> Self {
        Self::new(TopicMapEngine::new(base_locator))
    }

    fn lock(&self) -> MutexGuard<'_, TopicMapEngine> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a read against the engine under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&TopicMapEngine) -> R) -> R {
        f(&self.lock())
    }

    /// Run a mutation against the engine under the lock.
    pub fn write<R>(&self, f: impl FnOnce(&mut TopicMapEngine) -> R) -> R {
        f(&mut self.lock())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::View;
    use crate::types::IdentifierKind;
    use crate::LiteralValue;

    fn loc(s: &str) -> Locator {
        Locator::new(s).expect("locator")
    }

    fn engine() -> TopicMapEngine {
        TopicMapEngine::new(loc("http://example.org/map"))
    }

    #[test]
    fn closed_index_rejects_queries() {
        let eng = engine();
        let index = TypeInstanceIndex::new();
        assert_eq!(
            index.instances(eng.store(), ConstructId(1)),
            Err(EngineError::IndexClosed("type-instance"))
        );
    }

    #[test]
    fn reopened_index_serves_queries() {
        let mut eng = engine();
        let ty = eng.create_topic(View::Base).expect("create");
        let instance = eng.create_topic(View::Base).expect("create");
        eng.add_type(View::Base, instance, ty).expect("type");

        let mut index = TypeInstanceIndex::new();
        index.open();
        assert_eq!(
            index.instances(eng.store(), ty).expect("query"),
            vec![instance]
        );

        index.close();
        assert!(index.instances(eng.store(), ty).is_err());
    }

    #[test]
    fn literal_index_paged() {
        let mut eng = engine();
        let topic = eng.create_topic(View::Base).expect("create");
        let ty = eng.create_topic(View::Base).expect("create");
        for _ in 0..3 {
            eng.create_occurrence(
                View::Base,
                topic,
                ty,
                ScopeId::UNCONSTRAINED,
                LiteralValue::string("dup"),
            )
            .expect("create");
        }

        let mut index = LiteralIndex::new();
        index.open();
        let all = index.by_value(eng.store(), "dup").expect("query");
        assert_eq!(all.len(), 3);
        let page = index
            .by_value_paged(eng.store(), "dup", Page { offset: 1, limit: 1 })
            .expect("query");
        assert_eq!(page, vec![all[1]]);
    }

    #[test]
    fn transitive_supertypes_bounded_on_cycles() {
        let mut eng = engine();
        let a = eng.create_topic(View::Base).expect("create");
        let b = eng.create_topic(View::Base).expect("create");
        let c = eng.create_topic(View::Base).expect("create");
        eng.add_supertype(View::Base, a, b).expect("edge");
        eng.add_supertype(View::Base, b, c).expect("edge");
        eng.add_supertype(View::Base, c, a).expect("edge");

        let mut index = SupertypeSubtypeIndex::new();
        index.open();
        let ancestors = index
            .supertypes_transitive(eng.store(), a)
            .expect("query");
        assert_eq!(ancestors, vec![b, c]);
    }

    #[test]
    fn identity_index_resolves() {
        let mut eng = engine();
        let topic = eng.create_topic(View::Base).expect("create");
        eng.add_identifier(
            View::Base,
            topic,
            IdentifierKind::SubjectIdentifier,
            loc("u:t"),
        )
        .expect("identify");

        let mut index = IdentityIndex::new();
        index.open();
        assert_eq!(
            index.resolve(eng.store(), &loc("u:t")).expect("query"),
            Some(topic)
        );
        assert_eq!(
            index.resolve(eng.store(), &loc("u:other")).expect("query"),
            None
        );
    }

    #[test]
    fn concurrent_wrapper_shares_one_engine() {
        let shared = ConcurrentTopicMap::with_locator(loc("http://example.org/map"));
        let clone = shared.clone();

        let topic = shared
            .write(|eng| eng.create_topic(View::Base))
            .expect("create");
        let seen = clone
            .read(|eng| eng.contains(View::Base, topic))
            .expect("read");
        assert!(seen);
    }

    #[test]
    fn concurrent_wrapper_recovers_poisoned_lock() {
        let shared = ConcurrentTopicMap::with_locator(loc("http://example.org/map"));
        let clone = shared.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.inner.lock().expect("first lock");
            let poison: Option<u8> = None;
            poison.expect("poison the lock");
        })
        .join();

        // Still serviceable after the panic.
        let topic = shared
            .write(|eng| eng.create_topic(View::Base))
            .expect("create");
        assert!(shared
            .read(|eng| eng.contains(View::Base, topic))
            .expect("read"));
    }
}

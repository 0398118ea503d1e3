//! # Property-Based Tests
//!
//! Determinism and correctness invariants checked with proptest: scope
//! canonicalization, merge idempotence and snapshot stability.

use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeSet;

use topiq_core::{
    engine_from_bytes, engine_to_bytes, ConstructId, IdentifierKind, Locator, ScopeId,
    TopicMapEngine, View,
};

fn loc(s: &str) -> Locator {
    Locator::new(s).expect("locator")
}

fn engine() -> TopicMapEngine {
    TopicMapEngine::new(loc("http://example.org/map"))
}

/// Build an engine with `count` topics, returning their ids in order.
fn topics(eng: &mut TopicMapEngine, count: usize) -> Vec<ConstructId> {
    (0..count)
        .map(|_| eng.create_topic(View::Base).expect("create"))
        .collect()
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Interning the same theme set in any presentation order yields the
    /// same canonical scope id.
    #[test]
    fn scope_for_is_canonical_across_element_order(
        picks in vec(0usize..8, 1..8)
    ) {
        let mut eng = engine();
        let pool = topics(&mut eng, 8);

        let themes: BTreeSet<ConstructId> = picks.iter().map(|&i| pool[i]).collect();
        let forward = eng.scope_for(View::Base, &themes).expect("scope");

        // Feed the same themes back one by one in reverse pick order.
        let mut reversed = BTreeSet::new();
        for &i in picks.iter().rev() {
            reversed.insert(pool[i]);
        }
        let backward = eng.scope_for(View::Base, &reversed).expect("scope");

        prop_assert_eq!(forward, backward);
        prop_assert_ne!(forward, ScopeId::UNCONSTRAINED);
        prop_assert_eq!(eng.themes_of(View::Base, forward).expect("read"), Some(themes));
    }

    /// Merging is idempotent: once doomed is gone, re-running the merge
    /// against any survivor state changes nothing.
    #[test]
    fn merge_is_idempotent(name_count in 0usize..5) {
        let mut eng = engine();
        let name_type = eng.create_topic(View::Base).expect("create");
        let keep = eng.create_topic(View::Base).expect("create");
        let doomed = eng.create_topic(View::Base).expect("create");
        eng.add_identifier(View::Base, doomed, IdentifierKind::SubjectIdentifier, loc("u:d"))
            .expect("identify");

        for i in 0..name_count {
            eng.create_name(View::Base, doomed, name_type, ScopeId::UNCONSTRAINED, format!("n{i}"))
                .expect("name");
        }

        eng.merge_topics(View::Base, keep, doomed).expect("merge");
        let names_once = eng.names_of(View::Base, keep).expect("read");
        let count_once = eng.store().construct_count();

        eng.merge_topics(View::Base, keep, keep).expect("self merge is a no-op");
        prop_assert_eq!(eng.names_of(View::Base, keep).expect("read"), names_once);
        prop_assert_eq!(eng.store().construct_count(), count_once);
        prop_assert_eq!(eng.resolve(View::Base, &loc("u:d")).expect("read"), Some(keep));
    }

    /// Same sequence of operations produces identical stores.
    #[test]
    fn identical_operation_sequences_build_identical_stores(
        values in vec("[a-z]{1,8}", 1..10)
    ) {
        let build = |values: &[String]| -> TopicMapEngine {
            let mut eng = engine();
            let name_type = eng.create_topic(View::Base).expect("create");
            let txn = eng.begin();
            let topic = eng.create_topic(txn.view()).expect("create");
            for v in values {
                eng.create_name(txn.view(), topic, name_type, ScopeId::UNCONSTRAINED, v.clone())
                    .expect("name");
            }
            eng.commit(&txn).expect("commit");
            eng
        };

        let a = build(&values);
        let b = build(&values);

        // Timestamps differ between runs; compare structure, not log.
        prop_assert_eq!(a.store().construct_count(), b.store().construct_count());
        let records_a: Vec<_> = a.store().records().collect();
        let records_b: Vec<_> = b.store().records().collect();
        prop_assert_eq!(records_a, records_b);
    }

    /// A snapshot roundtrip preserves every construct and resolves the
    /// same identifiers.
    #[test]
    fn snapshot_roundtrip_is_lossless(
        suffixes in vec("[a-z]{1,6}", 1..10)
    ) {
        let mut eng = engine();
        let unique: BTreeSet<String> = suffixes.iter().cloned().collect();
        for s in &unique {
            let topic = eng.create_topic(View::Base).expect("create");
            eng.add_identifier(
                View::Base,
                topic,
                IdentifierKind::SubjectIdentifier,
                loc(&format!("http://example.org/{s}")),
            )
            .expect("identify");
        }

        let bytes = engine_to_bytes(&eng).expect("serialize");
        let restored = engine_from_bytes(&bytes).expect("deserialize");

        prop_assert_eq!(restored.store().construct_count(), eng.store().construct_count());
        for s in &unique {
            let l = loc(&format!("http://example.org/{s}"));
            prop_assert_eq!(
                restored.resolve(View::Base, &l).expect("read"),
                eng.resolve(View::Base, &l).expect("read")
            );
        }
    }

    /// Construct ids are never reused, whatever mix of base and txn
    /// allocations happens.
    #[test]
    fn construct_ids_are_unique_across_views(in_txn in vec(any::<bool>(), 1..30)) {
        let mut eng = engine();
        let txn = eng.begin();
        let mut seen = BTreeSet::new();

        for &use_txn in &in_txn {
            let view = if use_txn { txn.view() } else { View::Base };
            let id = eng.create_topic(view).expect("create");
            prop_assert!(seen.insert(id));
        }
        eng.commit(&txn).expect("commit");

        for &id in &seen {
            prop_assert!(eng.contains(View::Base, id).expect("read"));
        }
    }
}

//! Transaction isolation and commit/close semantics.

use topiq_core::{
    EngineError, IdentifierKind, LiteralValue, Locator, ScopeId, TopicMapEngine, View,
};

fn loc(s: &str) -> Locator {
    Locator::new(s).expect("locator")
}

fn engine() -> TopicMapEngine {
    TopicMapEngine::new(loc("http://example.org/map"))
}

#[test]
fn name_added_in_txn_is_invisible_until_commit() {
    let mut eng = engine();
    let name_type = eng.create_topic(View::Base).expect("create");
    let topic = eng.create_topic(View::Base).expect("create");

    let txn = eng.begin();
    let name = eng
        .create_name(txn.view(), topic, name_type, ScopeId::UNCONSTRAINED, "Ada")
        .expect("name");

    assert_eq!(eng.names_of(txn.view(), topic).expect("read"), vec![name]);
    assert!(eng.names_of(View::Base, topic).expect("read").is_empty());
    assert!(!eng.contains(View::Base, name).expect("read"));

    eng.commit(&txn).expect("commit");
    assert_eq!(eng.names_of(View::Base, topic).expect("read"), vec![name]);
}

#[test]
fn remove_then_close_leaves_base_intact() {
    let mut eng = engine();
    let topic = eng.create_topic(View::Base).expect("create");
    eng.add_identifier(View::Base, topic, IdentifierKind::ItemIdentifier, loc("u:t"))
        .expect("identify");

    let txn = eng.begin();
    eng.remove_construct(txn.view(), topic).expect("remove");
    assert!(!eng.contains(txn.view(), topic).expect("read"));

    eng.close(&txn).expect("close");
    assert!(eng.contains(View::Base, topic).expect("read"));
    assert_eq!(eng.resolve(View::Base, &loc("u:t")).expect("read"), Some(topic));
}

#[test]
fn remove_then_commit_removes_from_base() {
    let mut eng = engine();
    let topic = eng.create_topic(View::Base).expect("create");
    eng.add_identifier(View::Base, topic, IdentifierKind::ItemIdentifier, loc("u:t"))
        .expect("identify");

    let txn = eng.begin();
    eng.remove_construct(txn.view(), topic).expect("remove");
    eng.commit(&txn).expect("commit");

    assert!(!eng.contains(View::Base, topic).expect("read"));
    assert_eq!(eng.resolve(View::Base, &loc("u:t")).expect("read"), None);
}

#[test]
fn edits_after_remove_fail_fast_inside_txn() {
    let mut eng = engine();
    let name_type = eng.create_topic(View::Base).expect("create");
    let topic = eng.create_topic(View::Base).expect("create");

    let txn = eng.begin();
    eng.remove_construct(txn.view(), topic).expect("remove");
    let err = eng
        .create_name(txn.view(), topic, name_type, ScopeId::UNCONSTRAINED, "late")
        .expect_err("tombstoned parent");
    assert_eq!(err, EngineError::ConstructRemoved(topic));
}

#[test]
fn concurrent_transactions_do_not_observe_each_other() {
    let mut eng = engine();
    let ty = eng.create_topic(View::Base).expect("create");
    let topic = eng.create_topic(View::Base).expect("create");

    let t1 = eng.begin();
    let t2 = eng.begin();

    let occ = eng
        .create_occurrence(
            t1.view(),
            topic,
            ty,
            ScopeId::UNCONSTRAINED,
            LiteralValue::string("from t1"),
        )
        .expect("occurrence");

    assert!(eng.occurrences_of(t2.view(), topic).expect("read").is_empty());
    assert!(!eng.contains(t2.view(), occ).expect("read"));

    eng.commit(&t1).expect("commit");

    // T2 started before the commit but reads through to the live base.
    assert_eq!(eng.occurrences_of(t2.view(), topic).expect("read"), vec![occ]);
    eng.close(&t2).expect("close");
}

#[test]
fn ids_created_in_txn_are_stable_across_commit() {
    let mut eng = engine();
    let txn = eng.begin();
    let a = eng.create_topic(txn.view()).expect("create");
    let b = eng.create_topic(txn.view()).expect("create");
    eng.commit(&txn).expect("commit");

    assert!(eng.contains(View::Base, a).expect("read"));
    assert!(eng.contains(View::Base, b).expect("read"));

    // A topic created after the commit never reuses either id.
    let c = eng.create_topic(View::Base).expect("create");
    assert!(c > a && c > b);
}

#[test]
fn identity_collision_at_commit_keeps_txn_open_and_base_clean() {
    let mut eng = engine();
    let winner = eng.create_topic(View::Base).expect("create");

    let txn = eng.begin();
    let loser = eng.create_topic(txn.view()).expect("create");
    eng.add_identifier(
        txn.view(),
        loser,
        IdentifierKind::SubjectIdentifier,
        loc("u:contested"),
    )
    .expect("identify");

    // The base gains the same locator after the txn claimed it.
    eng.add_identifier(
        View::Base,
        winner,
        IdentifierKind::SubjectIdentifier,
        loc("u:contested"),
    )
    .expect("identify");

    let err = eng.commit(&txn).expect_err("collision");
    assert!(matches!(err, EngineError::IdentityConstraint { .. }));

    // Base is untouched, txn is still open for repair.
    assert_eq!(
        eng.resolve(View::Base, &loc("u:contested")).expect("read"),
        Some(winner)
    );
    assert!(!eng.contains(View::Base, loser).expect("read"));

    eng.remove_identifier(
        txn.view(),
        loser,
        IdentifierKind::SubjectIdentifier,
        &loc("u:contested"),
    )
    .expect("repair");
    eng.commit(&txn).expect("commit after repair");
    assert!(eng.contains(View::Base, loser).expect("read"));
}

#[test]
fn locator_moves_across_a_removal_in_one_commit() {
    let mut eng = engine();
    let old = eng.create_topic(View::Base).expect("create");
    eng.add_identifier(
        View::Base,
        old,
        IdentifierKind::SubjectIdentifier,
        loc("u:moved"),
    )
    .expect("identify");

    // Remove the holder and reassign its locator in the same transaction.
    let txn = eng.begin();
    eng.remove_construct(txn.view(), old).expect("remove");
    let replacement = eng.create_topic(txn.view()).expect("create");
    eng.add_identifier(
        txn.view(),
        replacement,
        IdentifierKind::SubjectIdentifier,
        loc("u:moved"),
    )
    .expect("identify");
    eng.commit(&txn).expect("commit");

    assert!(!eng.contains(View::Base, old).expect("read"));
    assert!(eng.contains(View::Base, replacement).expect("read"));
    assert_eq!(
        eng.resolve(View::Base, &loc("u:moved")).expect("read"),
        Some(replacement)
    );
}

#[test]
fn reifier_moves_across_a_removal_in_one_commit() {
    let mut eng = engine();
    let name_type = eng.create_topic(View::Base).expect("create");
    let topic = eng.create_topic(View::Base).expect("create");
    let old_reifier = eng.create_topic(View::Base).expect("create");
    let name = eng
        .create_name(View::Base, topic, name_type, ScopeId::UNCONSTRAINED, "reified")
        .expect("name");
    eng.set_reifier(View::Base, name, Some(old_reifier))
        .expect("reify");

    // Remove the reifier and hand the name a new one in the same txn.
    let txn = eng.begin();
    eng.remove_construct(txn.view(), old_reifier).expect("remove");
    let new_reifier = eng.create_topic(txn.view()).expect("create");
    eng.set_reifier(txn.view(), name, Some(new_reifier))
        .expect("reify");
    eng.commit(&txn).expect("commit");

    assert!(!eng.contains(View::Base, old_reifier).expect("read"));
    assert_eq!(
        eng.reifier_of(View::Base, name).expect("read"),
        Some(new_reifier)
    );
    assert_eq!(
        eng.reified_by(View::Base, new_reifier).expect("read"),
        Some(name)
    );
}

#[test]
fn commit_rejects_removal_when_base_gains_a_role() {
    let mut eng = engine();
    let assoc_type = eng.create_topic(View::Base).expect("create");
    let role_type = eng.create_topic(View::Base).expect("create");
    let topic = eng.create_topic(View::Base).expect("create");

    let txn = eng.begin();
    eng.remove_construct(txn.view(), topic).expect("remove");

    // The base gains a role played by the topic after the in-txn removal.
    let assoc = eng
        .create_association(View::Base, assoc_type, ScopeId::UNCONSTRAINED)
        .expect("assoc");
    let role = eng
        .create_role(View::Base, assoc, role_type, topic)
        .expect("role");

    let err = eng.commit(&txn).expect_err("dangling player");
    assert!(matches!(err, EngineError::ModelConstraint(_)));

    // Base untouched, role still wired, transaction still open.
    assert!(eng.contains(View::Base, topic).expect("read"));
    assert_eq!(eng.roles_played(View::Base, topic).expect("read"), vec![role]);
    assert_eq!(eng.open_transactions(), 1);
    eng.close(&txn).expect("close");
}

#[test]
fn commit_rejects_removal_when_base_gains_a_type_use() {
    let mut eng = engine();
    let topic = eng.create_topic(View::Base).expect("create");
    let instance = eng.create_topic(View::Base).expect("create");

    let txn = eng.begin();
    eng.remove_construct(txn.view(), topic).expect("remove");
    eng.add_type(View::Base, instance, topic).expect("type");

    let err = eng.commit(&txn).expect_err("dangling type");
    assert!(matches!(err, EngineError::ModelConstraint(_)));
    assert!(eng.contains(View::Base, topic).expect("read"));
    assert_eq!(eng.types_of(View::Base, instance).expect("read"), vec![topic]);
    eng.close(&txn).expect("close");
}

#[test]
fn dropped_theme_scope_never_reaches_the_base() {
    let mut eng = engine();

    let txn = eng.begin();
    let theme = eng.create_topic(txn.view()).expect("create");
    let themes = [theme].into_iter().collect();
    eng.scope_for(txn.view(), &themes).expect("scope");
    eng.remove_construct(txn.view(), theme).expect("remove");
    eng.commit(&txn).expect("commit");

    assert!(!eng.contains(View::Base, theme).expect("read"));
    assert_eq!(eng.scope_lookup(View::Base, &themes).expect("read"), None);
    assert!(eng.scopes_with_theme(View::Base, theme).expect("read").is_empty());
}

#[test]
fn unused_txn_scope_is_not_interned_at_commit() {
    let mut eng = engine();
    let theme = eng.create_topic(View::Base).expect("create");
    let themes = [theme].into_iter().collect();

    let txn = eng.begin();
    eng.scope_for(txn.view(), &themes).expect("scope");
    eng.create_topic(txn.view()).expect("create");
    eng.commit(&txn).expect("commit");

    // Nothing ever referenced the scope, so the base never learns it.
    assert_eq!(eng.scope_lookup(View::Base, &themes).expect("read"), None);
}

#[test]
fn closed_txn_view_is_rejected() {
    let mut eng = engine();
    let txn = eng.begin();
    let view = txn.view();
    eng.close(&txn).expect("close");

    let err = eng.create_topic(view).expect_err("stale view");
    assert!(matches!(err, EngineError::UnknownTransaction(_)));
}

#[test]
fn provisional_scope_matches_base_scope_after_commit() {
    let mut eng = engine();
    let name_type = eng.create_topic(View::Base).expect("create");
    let theme = eng.create_topic(View::Base).expect("create");
    let topic = eng.create_topic(View::Base).expect("create");
    let base_scope = eng
        .scope_for(View::Base, &[theme].into_iter().collect())
        .expect("scope");

    let txn = eng.begin();
    let txn_scope = eng
        .scope_for(txn.view(), &[theme].into_iter().collect())
        .expect("scope");
    // The txn resolves the known theme set to the existing canonical id.
    assert_eq!(txn_scope, base_scope);

    let name = eng
        .create_name(txn.view(), topic, name_type, txn_scope, "scoped")
        .expect("name");
    eng.commit(&txn).expect("commit");

    assert_eq!(eng.scoped_by(View::Base, base_scope).expect("read"), vec![name]);
}

#[test]
fn txn_only_scope_is_canonicalized_at_commit() {
    let mut eng = engine();
    let name_type = eng.create_topic(View::Base).expect("create");
    let topic = eng.create_topic(View::Base).expect("create");

    let txn = eng.begin();
    let theme = eng.create_topic(txn.view()).expect("create");
    let scope = eng
        .scope_for(txn.view(), &[theme].into_iter().collect())
        .expect("scope");
    let name = eng
        .create_name(txn.view(), topic, name_type, scope, "scoped")
        .expect("name");
    eng.commit(&txn).expect("commit");

    // Post-commit the scope resolves through the base interner.
    let canonical = eng
        .scope_for(View::Base, &[theme].into_iter().collect())
        .expect("scope");
    assert_eq!(eng.scoped_by(View::Base, canonical).expect("read"), vec![name]);
    assert_eq!(
        eng.themes_of(View::Base, canonical).expect("read"),
        Some([theme].into_iter().collect())
    );
}

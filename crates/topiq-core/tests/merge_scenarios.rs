//! End-to-end merge scenarios against the public engine surface.

use std::collections::BTreeSet;

use topiq_core::{
    ConstructId, EngineError, IdentifierKind, LiteralValue, Locator, ScopeId, TopicMapEngine, View,
};

fn loc(s: &str) -> Locator {
    Locator::new(s).expect("locator")
}

fn engine() -> TopicMapEngine {
    TopicMapEngine::new(loc("http://example.org/map"))
}

#[test]
fn merge_unions_identifiers_and_characteristics() {
    let mut eng = engine();
    let name_type = eng.create_topic(View::Base).expect("create");
    let occ_type = eng.create_topic(View::Base).expect("create");

    let keep = eng.create_topic(View::Base).expect("create");
    eng.add_identifier(View::Base, keep, IdentifierKind::SubjectIdentifier, loc("u:keep"))
        .expect("identify");
    eng.create_name(View::Base, keep, name_type, ScopeId::UNCONSTRAINED, "Keep")
        .expect("name");

    let doomed = eng.create_topic(View::Base).expect("create");
    eng.add_identifier(View::Base, doomed, IdentifierKind::SubjectIdentifier, loc("u:doomed"))
        .expect("identify");
    eng.add_identifier(View::Base, doomed, IdentifierKind::SubjectLocator, loc("u:doomed-sl"))
        .expect("identify");
    eng.create_name(View::Base, doomed, name_type, ScopeId::UNCONSTRAINED, "Doomed")
        .expect("name");
    eng.create_occurrence(
        View::Base,
        doomed,
        occ_type,
        ScopeId::UNCONSTRAINED,
        LiteralValue::string("42"),
    )
    .expect("occurrence");

    eng.merge_topics(View::Base, keep, doomed).expect("merge");

    // Doomed is gone but every former identifier resolves to the survivor.
    assert!(!eng.contains(View::Base, doomed).expect("read"));
    assert_eq!(eng.resolve(View::Base, &loc("u:keep")).expect("read"), Some(keep));
    assert_eq!(eng.resolve(View::Base, &loc("u:doomed")).expect("read"), Some(keep));
    assert_eq!(eng.resolve(View::Base, &loc("u:doomed-sl")).expect("read"), Some(keep));

    let ids = eng.identifiers_of(View::Base, keep).expect("read");
    assert_eq!(ids.subject_identifiers.len(), 2);
    assert_eq!(ids.subject_locators.len(), 1);

    assert_eq!(eng.names_of(View::Base, keep).expect("read").len(), 2);
    assert_eq!(eng.occurrences_of(View::Base, keep).expect("read").len(), 1);
}

#[test]
fn knows_association_survives_merge_without_dangling_player() {
    let mut eng = engine();
    let knows = eng.create_topic(View::Base).expect("create");
    let knower = eng.create_topic(View::Base).expect("create");
    let known = eng.create_topic(View::Base).expect("create");

    let t1 = eng.create_topic(View::Base).expect("create");
    let t2 = eng.create_topic(View::Base).expect("create");
    let other = eng.create_topic(View::Base).expect("create");

    // T2 knows `other`.
    let assoc = eng
        .create_association(View::Base, knows, ScopeId::UNCONSTRAINED)
        .expect("assoc");
    eng.create_role(View::Base, assoc, knower, t2).expect("role");
    let known_role = eng.create_role(View::Base, assoc, known, other).expect("role");

    eng.merge_topics(View::Base, t1, t2).expect("merge");

    // T2 is unresolvable, its role now names T1, nothing dangles.
    assert!(!eng.contains(View::Base, t2).expect("read"));
    let roles = eng.roles_of(View::Base, assoc).expect("read");
    assert_eq!(roles.len(), 2);
    let players: BTreeSet<ConstructId> = roles
        .iter()
        .filter_map(|&r| match eng.construct(View::Base, r).expect("read") {
            Some(topiq_core::Construct::Role(role)) => Some(role.player),
            _ => None,
        })
        .collect();
    assert_eq!(players, [t1, other].into_iter().collect());
    assert!(eng.contains(View::Base, known_role).expect("read"));
}

#[test]
fn self_association_roles_collapse_by_type_and_player() {
    let mut eng = engine();
    let knows = eng.create_topic(View::Base).expect("create");
    let friend = eng.create_topic(View::Base).expect("create");
    let colleague = eng.create_topic(View::Base).expect("create");

    let t1 = eng.create_topic(View::Base).expect("create");
    let t2 = eng.create_topic(View::Base).expect("create");

    // T1 and T2 both play `friend`, T2 also plays `colleague`.
    let assoc = eng
        .create_association(View::Base, knows, ScopeId::UNCONSTRAINED)
        .expect("assoc");
    eng.create_role(View::Base, assoc, friend, t1).expect("role");
    eng.create_role(View::Base, assoc, friend, t2).expect("role");
    eng.create_role(View::Base, assoc, colleague, t2).expect("role");

    eng.merge_topics(View::Base, t1, t2).expect("merge");

    // Same type + same player collapses; the distinct role type is kept.
    let roles = eng.roles_of(View::Base, assoc).expect("read");
    assert_eq!(roles.len(), 2);
    let signature: BTreeSet<(ConstructId, ConstructId)> = roles
        .iter()
        .filter_map(|&r| match eng.construct(View::Base, r).expect("read") {
            Some(topiq_core::Construct::Role(role)) => Some((role.type_id, role.player)),
            _ => None,
        })
        .collect();
    assert_eq!(signature, [(friend, t1), (colleague, t1)].into_iter().collect());
}

#[test]
fn duplicate_associations_collapse_after_merge() {
    let mut eng = engine();
    let ty = eng.create_topic(View::Base).expect("create");
    let role_type = eng.create_topic(View::Base).expect("create");
    let partner = eng.create_topic(View::Base).expect("create");

    let t1 = eng.create_topic(View::Base).expect("create");
    let t2 = eng.create_topic(View::Base).expect("create");

    // Structurally equal associations on both sides of the merge.
    for topic in [t1, t2] {
        let assoc = eng
            .create_association(View::Base, ty, ScopeId::UNCONSTRAINED)
            .expect("assoc");
        eng.create_role(View::Base, assoc, role_type, topic).expect("role");
        eng.create_role(View::Base, assoc, role_type, partner).expect("role");
    }

    eng.merge_topics(View::Base, t1, t2).expect("merge");

    let survivor_roles = eng.roles_played(View::Base, t1).expect("read");
    assert_eq!(survivor_roles.len(), 1);
    assert_eq!(eng.roles_played(View::Base, partner).expect("read").len(), 1);
}

#[test]
fn merge_by_identity_collision_workflow() {
    let mut eng = engine();
    let a = eng.create_topic(View::Base).expect("create");
    let b = eng.create_topic(View::Base).expect("create");
    eng.add_identifier(View::Base, a, IdentifierKind::SubjectIdentifier, loc("u:same"))
        .expect("identify");

    // Assigning the same locator to a different topic is the collision
    // that callers resolve by merging.
    let err = eng
        .add_identifier(View::Base, b, IdentifierKind::SubjectIdentifier, loc("u:same"))
        .expect_err("collision");
    let endpoints = match err {
        EngineError::IdentityConstraint { existing, candidate, .. } => Some((existing, candidate)),
        _ => None,
    };
    assert_eq!(endpoints, Some((a, b)));

    eng.merge_topics(View::Base, a, b).expect("merge");
    assert_eq!(eng.resolve(View::Base, &loc("u:same")).expect("read"), Some(a));
}

#[test]
fn merge_inside_transaction_collapses_scoped_names() {
    let mut eng = engine();
    let name_type = eng.create_topic(View::Base).expect("create");
    let theme = eng.create_topic(View::Base).expect("create");
    let t1 = eng.create_topic(View::Base).expect("create");
    let t2 = eng.create_topic(View::Base).expect("create");

    let scope = eng
        .scope_for(View::Base, &[theme].into_iter().collect())
        .expect("scope");
    eng.create_name(View::Base, t1, name_type, scope, "Same")
        .expect("name");
    eng.create_name(View::Base, t2, name_type, scope, "Same")
        .expect("name");

    let txn = eng.begin();
    eng.merge_topics(txn.view(), t1, t2).expect("merge");
    assert_eq!(eng.names_of(txn.view(), t1).expect("read").len(), 1);

    // Base untouched until commit.
    assert_eq!(eng.names_of(View::Base, t1).expect("read").len(), 1);
    assert!(eng.contains(View::Base, t2).expect("read"));

    eng.commit(&txn).expect("commit");
    assert_eq!(eng.names_of(View::Base, t1).expect("read").len(), 1);
    assert!(!eng.contains(View::Base, t2).expect("read"));
}

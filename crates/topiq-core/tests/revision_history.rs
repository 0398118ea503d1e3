//! Revision log navigation and frozen snapshot stability.

use std::collections::BTreeMap;

use chrono::Duration;
use topiq_core::{
    ChangeKind, EventKind, FrozenConstruct, Locator, ResolvedRef, ScopeId, TopicMapEngine, View,
};

fn loc(s: &str) -> Locator {
    Locator::new(s).expect("locator")
}

fn engine() -> TopicMapEngine {
    TopicMapEngine::new(loc("http://example.org/map"))
}

#[test]
fn each_commit_appends_one_revision() {
    let mut eng = engine();

    let t1 = eng.begin();
    eng.create_topic(t1.view()).expect("create");
    let r1 = eng.commit(&t1).expect("commit");

    let t2 = eng.begin();
    eng.create_topic(t2.view()).expect("create");
    let r2 = eng.commit(&t2).expect("commit");

    let log = eng.revision_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log.first().map(|r| r.id), Some(r1));
    assert_eq!(log.last().map(|r| r.id), Some(r2));
    assert_eq!(log.previous(r2).map(|r| r.id), Some(r1));
    assert_eq!(log.next(r1).map(|r| r.id), Some(r2));
    assert!(log.previous(r1).is_none());
    assert!(log.next(r2).is_none());
}

#[test]
fn changeset_records_before_and_after_images() {
    let mut eng = engine();
    let name_type = eng.create_topic(View::Base).expect("create");
    let topic = eng.create_topic(View::Base).expect("create");
    let name = eng
        .create_name(View::Base, topic, name_type, ScopeId::UNCONSTRAINED, "Old")
        .expect("name");

    let txn = eng.begin();
    eng.set_name_value(txn.view(), name, "New").expect("edit");
    let rev = eng.commit(&txn).expect("commit");

    let revision = eng.revision(rev).expect("revision");
    assert_eq!(revision.kind, EventKind::TransactionCommit);

    let delta = revision.changeset.delta_for(name).expect("delta");
    assert_eq!(delta.change, ChangeKind::Modified);
    let value_of = |image: &Option<FrozenConstruct>| match image {
        Some(FrozenConstruct::Name { value, .. }) => Some(value.clone()),
        _ => None,
    };
    assert_eq!(value_of(&delta.before), Some("Old".to_string()));
    assert_eq!(value_of(&delta.after), Some("New".to_string()));
}

#[test]
fn merge_commit_is_flagged_as_topics_merged() {
    let mut eng = engine();
    let a = eng.create_topic(View::Base).expect("create");
    let b = eng.create_topic(View::Base).expect("create");

    let txn = eng.begin();
    eng.merge_topics(txn.view(), a, b).expect("merge");
    let rev = eng.commit(&txn).expect("commit");

    assert_eq!(eng.revision(rev).map(|r| r.kind), Some(EventKind::TopicsMerged));
}

#[test]
fn tagged_revision_is_retrievable_with_metadata() {
    let mut eng = engine();
    let txn = eng.begin();
    eng.create_topic(txn.view()).expect("create");

    let mut metadata = BTreeMap::new();
    metadata.insert("author".to_string(), "import-job".to_string());
    let rev = eng
        .commit_tagged(&txn, "initial-load", metadata)
        .expect("commit");

    let revision = eng.revision_by_tag("initial-load").expect("by tag");
    assert_eq!(revision.id, rev);
    assert_eq!(
        revision.metadata.get("author").map(String::as_str),
        Some("import-job")
    );
}

#[test]
fn timestamp_lookup_returns_latest_not_after() {
    let mut eng = engine();

    let t1 = eng.begin();
    eng.create_topic(t1.view()).expect("create");
    let r1 = eng.commit(&t1).expect("commit");

    let t2 = eng.begin();
    eng.create_topic(t2.view()).expect("create");
    let r2 = eng.commit(&t2).expect("commit");

    let first_ts = eng.revision(r1).expect("revision").timestamp;
    let last_ts = eng.revision(r2).expect("revision").timestamp;

    assert_eq!(eng.revision_by_timestamp(first_ts).map(|r| r.id), Some(r1));
    assert_eq!(
        eng.revision_by_timestamp(last_ts + Duration::hours(1)).map(|r| r.id),
        Some(r2)
    );
    assert!(eng
        .revision_by_timestamp(first_ts - Duration::hours(1))
        .is_none());
}

#[test]
fn frozen_image_at_revision_n_survives_later_mutations() {
    let mut eng = engine();
    let name_type = eng.create_topic(View::Base).expect("create");
    let topic = eng.create_topic(View::Base).expect("create");

    let txn = eng.begin();
    let name = eng
        .create_name(txn.view(), topic, name_type, ScopeId::UNCONSTRAINED, "v1")
        .expect("name");
    let rev = eng.commit(&txn).expect("commit");

    let image = eng
        .revision(rev)
        .and_then(|r| r.changeset.delta_for(name))
        .and_then(|d| d.after.clone())
        .expect("after image");

    // Mutate and then delete the live construct at revision N+1.
    let later = eng.begin();
    eng.set_name_value(later.view(), name, "v2").expect("edit");
    eng.commit(&later).expect("commit");
    let gone = eng.begin();
    eng.remove_construct(gone.view(), name).expect("remove");
    eng.commit(&gone).expect("commit");

    // The frozen image still reads "v1".
    let frozen_value = match image {
        FrozenConstruct::Name { value, .. } => Some(value),
        _ => None,
    };
    assert_eq!(frozen_value, Some("v1".to_string()));
}

#[test]
fn frozen_ref_falls_back_to_last_image_after_removal() {
    let mut eng = engine();
    let name_type = eng.create_topic(View::Base).expect("create");
    let topic = eng.create_topic(View::Base).expect("create");

    let txn = eng.begin();
    let name = eng
        .create_name(txn.view(), topic, name_type, ScopeId::UNCONSTRAINED, "kept")
        .expect("name");
    eng.commit(&txn).expect("commit");

    let handle = eng.frozen_ref(name);
    assert!(matches!(
        eng.resolve_ref(&handle),
        Some(ResolvedRef::Live(_))
    ));

    let gone = eng.begin();
    eng.remove_construct(gone.view(), name).expect("remove");
    eng.commit(&gone).expect("commit");

    let frozen_value = match eng.resolve_ref(&handle) {
        Some(ResolvedRef::Frozen(FrozenConstruct::Name { value, .. })) => Some(value.clone()),
        _ => None,
    };
    assert_eq!(frozen_value, Some("kept".to_string()));
}

#[test]
fn frozen_images_capture_themes_not_scope_ids() {
    let mut eng = engine();
    let name_type = eng.create_topic(View::Base).expect("create");
    let theme = eng.create_topic(View::Base).expect("create");
    let topic = eng.create_topic(View::Base).expect("create");
    let scope = eng
        .scope_for(View::Base, &[theme].into_iter().collect())
        .expect("scope");

    let txn = eng.begin();
    let name = eng
        .create_name(txn.view(), topic, name_type, scope, "scoped")
        .expect("name");
    let rev = eng.commit(&txn).expect("commit");

    let themes = eng
        .revision(rev)
        .and_then(|r| r.changeset.delta_for(name))
        .and_then(|d| d.after.as_ref())
        .and_then(|image| match image {
            FrozenConstruct::Name { scope_themes, .. } => Some(scope_themes.clone()),
            _ => None,
        })
        .expect("themes");
    assert_eq!(themes, [theme].into_iter().collect());
}

#[test]
fn closed_transaction_leaves_no_revision() {
    let mut eng = engine();
    let txn = eng.begin();
    eng.create_topic(txn.view()).expect("create");
    eng.close(&txn).expect("close");
    assert!(eng.revision_log().is_empty());
}

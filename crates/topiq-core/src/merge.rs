//! # Merge Engine
//!
//! Collapses two topics into one, then collapses the duplicate
//! characteristics the union produces. Written against [`StoreView`] so
//! the same pass runs on the base store and inside a transaction overlay
//! with identical semantics.
//!
//! Survivor rules: the caller picks which topic survives; among duplicate
//! characteristics the lowest id survives. When both sides of a collapsed
//! duplicate are reified, the two reifier topics are themselves merged,
//! so one merge can cascade.

use crate::model::Construct;
use crate::types::{ConstructId, EngineError, LiteralValue, ScopeId};
use crate::StoreView;
use std::collections::{BTreeMap, BTreeSet};

/// Merge `doomed` into `keep`.
///
/// Every reference to `doomed` in the view (identifiers, type and
/// supertype edges, typed constructs, role players, scope themes, the
/// construct it reifies) is repointed at `keep`, its names and
/// occurrences are reparented, `doomed` is removed, and duplicates on
/// `keep` are collapsed. Merging a topic into itself, or a `doomed` that
/// no longer exists, is a no-op so repeated merges stay idempotent.
pub fn merge_topics<S: StoreView + ?Sized>(
    store: &mut S,
    keep: ConstructId,
    doomed: ConstructId,
) -> Result<(), EngineError> {
    let mut queue = vec![(keep, doomed)];
    // Reifier unification can schedule further topic merges; the remap
    // chases pairs whose endpoints were consumed by an earlier entry.
    let mut remap: BTreeMap<ConstructId, ConstructId> = BTreeMap::new();
    while let Some((mut keep, mut doomed)) = queue.pop() {
        while let Some(&target) = remap.get(&keep) {
            keep = target;
        }
        while let Some(&target) = remap.get(&doomed) {
            doomed = target;
        }
        if keep == doomed || !store.contains(doomed) {
            continue;
        }
        merge_pair(store, keep, doomed, &mut queue)?;
        remap.insert(doomed, keep);
    }
    Ok(())
}

/// Replace `other` with `topic`: `topic` absorbs every characteristic and
/// reference of `other`, and `other` is removed from the view.
pub fn replace_topic<S: StoreView + ?Sized>(
    store: &mut S,
    topic: ConstructId,
    other: ConstructId,
) -> Result<(), EngineError> {
    merge_topics(store, topic, other)
}

fn merge_pair<S: StoreView + ?Sized>(
    store: &mut S,
    keep: ConstructId,
    doomed: ConstructId,
    queue: &mut Vec<(ConstructId, ConstructId)>,
) -> Result<(), EngineError> {
    if !store.contains(keep) {
        return Err(EngineError::ModelConstraint(format!(
            "merge target {keep:?} does not exist"
        )));
    }
    let map = |id: ConstructId| if id == doomed { keep } else { id };

    // Identifier migration. Each locator is detached from doomed before it
    // is attached to keep, so no intermediate state violates uniqueness.
    for (kind, locator) in store.identifiers_of(doomed).iter() {
        let locator = locator.clone();
        store.remove_identifier(doomed, kind, &locator)?;
        store.add_identifier(keep, kind, locator)?;
    }

    // Type and supertype edges, both directions.
    for type_topic in store.types_of(doomed) {
        store.remove_type(doomed, type_topic)?;
        if map(type_topic) != keep {
            store.add_type(keep, type_topic)?;
        }
    }
    for instance in store.instances_of(doomed) {
        store.remove_type(instance, doomed)?;
        if map(instance) != keep {
            store.add_type(instance, keep)?;
        }
    }
    for supertype in store.supertypes_of(doomed) {
        store.remove_supertype(doomed, supertype)?;
        if map(supertype) != keep {
            store.add_supertype(keep, supertype)?;
        }
    }
    for subtype in store.subtypes_of(doomed) {
        store.remove_supertype(subtype, doomed)?;
        if map(subtype) != keep {
            store.add_supertype(subtype, keep)?;
        }
    }

    // Constructs typed by doomed and roles doomed plays.
    for construct in store.typed_by(doomed) {
        store.set_type(construct, keep)?;
    }
    for role in store.roles_played(doomed) {
        store.set_player(role, keep)?;
    }

    // Scopes containing doomed as a theme: every scoped construct moves to
    // the canonical scope of the substituted theme set.
    for scope in store.scopes_with_theme(doomed) {
        let Some(themes) = store.themes_of(scope) else {
            continue;
        };
        let substituted: BTreeSet<ConstructId> =
            themes.into_iter().map(map).collect();
        let target = store.scope_for(&substituted)?;
        if target != scope {
            for construct in store.scoped_by(scope) {
                store.set_scope(construct, target)?;
            }
        }
    }

    // Reification: if doomed reifies something, keep takes over unless it
    // already reifies a construct of its own, in which case doomed's
    // reification is dropped.
    if let Some(reified) = store.reified_by(doomed) {
        store.set_reifier(reified, None)?;
        if store.reified_by(keep).is_none() {
            store.set_reifier(reified, Some(keep))?;
        }
    }

    // Reparent owned characteristics, then retire the topic.
    for name in store.names_of(doomed) {
        store.reparent(name, keep)?;
    }
    for occurrence in store.occurrences_of(doomed) {
        store.reparent(occurrence, keep)?;
    }
    store.remove_construct(doomed)?;

    collapse_duplicates(store, keep, queue)
}

// =============================================================================
// DUPLICATE COLLAPSE
// =============================================================================

type NameKey = (ConstructId, ScopeId, String);
type LiteralKey = (ConstructId, ScopeId, LiteralValue);
type RoleKey = (ConstructId, ConstructId);
type AssociationKey = (ConstructId, ScopeId, BTreeSet<RoleKey>);

/// Collapse equal names, occurrences, variants, roles and associations
/// around `topic` after a merge united two characteristic sets.
fn collapse_duplicates<S: StoreView + ?Sized>(
    store: &mut S,
    topic: ConstructId,
    queue: &mut Vec<(ConstructId, ConstructId)>,
) -> Result<(), EngineError> {
    collapse_names(store, topic, queue)?;
    collapse_occurrences(store, topic, queue)?;
    collapse_associations(store, topic, queue)
}

/// Drop `dupe`'s reification, unifying reifiers when both sides carry one.
fn unify_reifiers<S: StoreView + ?Sized>(
    store: &mut S,
    survivor: ConstructId,
    dupe: ConstructId,
    queue: &mut Vec<(ConstructId, ConstructId)>,
) -> Result<(), EngineError> {
    let Some(dupe_reifier) = store.reifier_of(dupe) else {
        return Ok(());
    };
    store.set_reifier(dupe, None)?;
    match store.reifier_of(survivor) {
        Some(existing) if existing != dupe_reifier => queue.push((existing, dupe_reifier)),
        Some(_) => {}
        None => store.set_reifier(survivor, Some(dupe_reifier))?,
    }
    Ok(())
}

fn collapse_names<S: StoreView + ?Sized>(
    store: &mut S,
    topic: ConstructId,
    queue: &mut Vec<(ConstructId, ConstructId)>,
) -> Result<(), EngineError> {
    let mut groups: BTreeMap<NameKey, Vec<ConstructId>> = BTreeMap::new();
    for name in store.names_of(topic) {
        if let Some(Construct::Name(n)) = store.construct(name) {
            groups
                .entry((n.type_id, n.scope, n.value))
                .or_default()
                .push(name);
        }
    }
    for ids in groups.into_values() {
        let Some((&survivor, dupes)) = ids.split_first() else {
            continue;
        };
        for &dupe in dupes {
            for variant in store.variants_of(dupe) {
                store.reparent(variant, survivor)?;
            }
            unify_reifiers(store, survivor, dupe, queue)?;
            store.remove_construct(dupe)?;
        }
        collapse_variants(store, survivor, queue)?;
    }
    Ok(())
}

fn collapse_variants<S: StoreView + ?Sized>(
    store: &mut S,
    name: ConstructId,
    queue: &mut Vec<(ConstructId, ConstructId)>,
) -> Result<(), EngineError> {
    let mut groups: BTreeMap<(ScopeId, LiteralValue), Vec<ConstructId>> = BTreeMap::new();
    for variant in store.variants_of(name) {
        if let Some(Construct::Variant(v)) = store.construct(variant) {
            groups.entry((v.scope, v.value)).or_default().push(variant);
        }
    }
    for ids in groups.into_values() {
        let Some((&survivor, dupes)) = ids.split_first() else {
            continue;
        };
        for &dupe in dupes {
            unify_reifiers(store, survivor, dupe, queue)?;
            store.remove_construct(dupe)?;
        }
    }
    Ok(())
}

fn collapse_occurrences<S: StoreView + ?Sized>(
    store: &mut S,
    topic: ConstructId,
    queue: &mut Vec<(ConstructId, ConstructId)>,
) -> Result<(), EngineError> {
    let mut groups: BTreeMap<LiteralKey, Vec<ConstructId>> = BTreeMap::new();
    for occurrence in store.occurrences_of(topic) {
        if let Some(Construct::Occurrence(o)) = store.construct(occurrence) {
            groups
                .entry((o.type_id, o.scope, o.value))
                .or_default()
                .push(occurrence);
        }
    }
    for ids in groups.into_values() {
        let Some((&survivor, dupes)) = ids.split_first() else {
            continue;
        };
        for &dupe in dupes {
            unify_reifiers(store, survivor, dupe, queue)?;
            store.remove_construct(dupe)?;
        }
    }
    Ok(())
}

fn role_signature<S: StoreView + ?Sized>(
    store: &S,
    association: ConstructId,
) -> BTreeSet<RoleKey> {
    store
        .roles_of(association)
        .into_iter()
        .filter_map(|role| match store.construct(role) {
            Some(Construct::Role(r)) => Some((r.type_id, r.player)),
            _ => None,
        })
        .collect()
}

fn collapse_associations<S: StoreView + ?Sized>(
    store: &mut S,
    topic: ConstructId,
    queue: &mut Vec<(ConstructId, ConstructId)>,
) -> Result<(), EngineError> {
    // Associations the topic participates in, via its roles.
    let mut associations = BTreeSet::new();
    for role in store.roles_played(topic) {
        if let Some(Construct::Role(r)) = store.construct(role) {
            associations.insert(r.parent);
        }
    }

    // Repointing players can leave equal roles inside one association.
    for &association in &associations {
        collapse_roles(store, association, queue)?;
    }

    let mut groups: BTreeMap<AssociationKey, Vec<ConstructId>> = BTreeMap::new();
    for association in associations {
        if let Some(Construct::Association(a)) = store.construct(association) {
            let signature = role_signature(store, association);
            groups
                .entry((a.type_id, a.scope, signature))
                .or_default()
                .push(association);
        }
    }
    for ids in groups.into_values() {
        let Some((&survivor, dupes)) = ids.split_first() else {
            continue;
        };
        // Survivor roles by signature, for role-level reifier unification.
        let mut survivor_roles: BTreeMap<RoleKey, ConstructId> = BTreeMap::new();
        for role in store.roles_of(survivor) {
            if let Some(Construct::Role(r)) = store.construct(role) {
                survivor_roles.entry((r.type_id, r.player)).or_insert(role);
            }
        }
        for &dupe in dupes {
            for role in store.roles_of(dupe) {
                if let Some(Construct::Role(r)) = store.construct(role) {
                    if let Some(&twin) = survivor_roles.get(&(r.type_id, r.player)) {
                        unify_reifiers(store, twin, role, queue)?;
                    }
                }
            }
            unify_reifiers(store, survivor, dupe, queue)?;
            store.remove_construct(dupe)?;
        }
    }
    Ok(())
}

fn collapse_roles<S: StoreView + ?Sized>(
    store: &mut S,
    association: ConstructId,
    queue: &mut Vec<(ConstructId, ConstructId)>,
) -> Result<(), EngineError> {
    let mut groups: BTreeMap<RoleKey, Vec<ConstructId>> = BTreeMap::new();
    for role in store.roles_of(association) {
        if let Some(Construct::Role(r)) = store.construct(role) {
            groups.entry((r.type_id, r.player)).or_default().push(role);
        }
    }
    for ids in groups.into_values() {
        let Some((&survivor, dupes)) = ids.split_first() else {
            continue;
        };
        for &dupe in dupes {
            unify_reifiers(store, survivor, dupe, queue)?;
            store.remove_construct(dupe)?;
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

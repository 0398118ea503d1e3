//! # Revision & Frozen History
//!
//! Every committed transaction (and every merge event inside it) leaves a
//! revision: an ordered changeset of per-construct deltas with full
//! before/after images. Images are deep frozen copies; scope is captured
//! as the theme-topic set rather than a scope id, so images stay
//! meaningful independent of interning state.
//!
//! [`FrozenRef`] is the application-facing handle: it resolves to the
//! live construct while one exists and falls back to the construct's last
//! recorded image once it is gone, memoizing the fallback.

use crate::model::{Construct, IdentifierSets};
use crate::store::MemoryStore;
use crate::types::{ConstructId, ConstructKind, LiteralValue, RevisionId};
use crate::StoreReads;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// FROZEN IMAGES
// =============================================================================

/// Deep frozen image of one construct at a point in history.
///
/// All references are ids of other constructs as they existed at capture
/// time; scoped constructs carry their theme topics directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrozenConstruct {
    Topic {
        identifiers: IdentifierSets,
        types: BTreeSet<ConstructId>,
        supertypes: BTreeSet<ConstructId>,
        names: BTreeSet<ConstructId>,
        occurrences: BTreeSet<ConstructId>,
        roles_played: BTreeSet<ConstructId>,
        reified: Option<ConstructId>,
    },
    Association {
        type_ref: ConstructId,
        scope_themes: BTreeSet<ConstructId>,
        roles: BTreeSet<ConstructId>,
        reifier: Option<ConstructId>,
    },
    Role {
        parent: ConstructId,
        type_ref: ConstructId,
        player: ConstructId,
        reifier: Option<ConstructId>,
    },
    Name {
        parent: ConstructId,
        type_ref: ConstructId,
        scope_themes: BTreeSet<ConstructId>,
        value: String,
        variants: BTreeSet<ConstructId>,
        reifier: Option<ConstructId>,
    },
    Occurrence {
        parent: ConstructId,
        type_ref: ConstructId,
        scope_themes: BTreeSet<ConstructId>,
        value: LiteralValue,
        reifier: Option<ConstructId>,
    },
    Variant {
        parent: ConstructId,
        scope_themes: BTreeSet<ConstructId>,
        value: LiteralValue,
        reifier: Option<ConstructId>,
    },
}

impl FrozenConstruct {
    #[must_use]
    pub fn kind(&self) -> ConstructKind {
        match self {
            Self::Topic { .. } => ConstructKind::Topic,
            Self::Association { .. } => ConstructKind::Association,
            Self::Role { .. } => ConstructKind::Role,
            Self::Name { .. } => ConstructKind::Name,
            Self::Occurrence { .. } => ConstructKind::Occurrence,
            Self::Variant { .. } => ConstructKind::Variant,
        }
    }
}

/// Capture a frozen image of a construct from any view.
#[must_use]
pub fn freeze(reads: &dyn StoreReads, id: ConstructId) -> Option<FrozenConstruct> {
    let themes = |scope| reads.themes_of(scope).unwrap_or_default();
    Some(match reads.construct(id)? {
        Construct::Topic(_) => FrozenConstruct::Topic {
            identifiers: reads.identifiers_of(id),
            types: reads.types_of(id).into_iter().collect(),
            supertypes: reads.supertypes_of(id).into_iter().collect(),
            names: reads.names_of(id).into_iter().collect(),
            occurrences: reads.occurrences_of(id).into_iter().collect(),
            roles_played: reads.roles_played(id).into_iter().collect(),
            reified: reads.reified_by(id),
        },
        Construct::Association(a) => FrozenConstruct::Association {
            type_ref: a.type_id,
            scope_themes: themes(a.scope),
            roles: reads.roles_of(id).into_iter().collect(),
            reifier: reads.reifier_of(id),
        },
        Construct::Role(r) => FrozenConstruct::Role {
            parent: r.parent,
            type_ref: r.type_id,
            player: r.player,
            reifier: reads.reifier_of(id),
        },
        Construct::Name(n) => FrozenConstruct::Name {
            parent: n.parent,
            type_ref: n.type_id,
            scope_themes: themes(n.scope),
            value: n.value,
            variants: reads.variants_of(id).into_iter().collect(),
            reifier: reads.reifier_of(id),
        },
        Construct::Occurrence(o) => FrozenConstruct::Occurrence {
            parent: o.parent,
            type_ref: o.type_id,
            scope_themes: themes(o.scope),
            value: o.value,
            reifier: reads.reifier_of(id),
        },
        Construct::Variant(v) => FrozenConstruct::Variant {
            parent: v.parent,
            scope_themes: themes(v.scope),
            value: v.value,
            reifier: reads.reifier_of(id),
        },
    })
}

// =============================================================================
// CHANGESETS
// =============================================================================

/// How a construct changed within one revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One construct's change within a revision, with before/after images.
///
/// `before` is absent for additions, `after` for removals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub construct: ConstructId,
    pub kind: ConstructKind,
    pub change: ChangeKind,
    pub before: Option<FrozenConstruct>,
    pub after: Option<FrozenConstruct>,
}

/// Ordered set of deltas for one revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub deltas: Vec<Delta>,
}

impl Changeset {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: Delta) {
        self.deltas.push(delta);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    /// The delta touching a construct, if this changeset has one.
    #[must_use]
    pub fn delta_for(&self, construct: ConstructId) -> Option<&Delta> {
        self.deltas.iter().find(|d| d.construct == construct)
    }

    pub fn added(&self) -> impl Iterator<Item = &Delta> {
        self.deltas.iter().filter(|d| d.change == ChangeKind::Added)
    }

    pub fn modified(&self) -> impl Iterator<Item = &Delta> {
        self.deltas
            .iter()
            .filter(|d| d.change == ChangeKind::Modified)
    }

    pub fn removed(&self) -> impl Iterator<Item = &Delta> {
        self.deltas
            .iter()
            .filter(|d| d.change == ChangeKind::Removed)
    }
}

// =============================================================================
// REVISIONS
// =============================================================================

/// What produced a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// An ordinary transaction commit.
    TransactionCommit,
    /// A commit whose transaction merged topics.
    TopicsMerged,
}

/// One committed revision of the map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: RevisionId,
    pub kind: EventKind,
    pub changeset: Changeset,
    pub timestamp: DateTime<Utc>,
    pub tag: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Append-only revision history of one map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevisionLog {
    revisions: Vec<Revision>,
    by_tag: BTreeMap<String, RevisionId>,
}

impl RevisionLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a revision, assigning the next id. A tag that is already
    /// taken is reassigned to the new revision.
    pub fn append(
        &mut self,
        kind: EventKind,
        changeset: Changeset,
        tag: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> RevisionId {
        let id = RevisionId((self.revisions.len() as u64).saturating_add(1));
        if let Some(tag) = &tag {
            self.by_tag.insert(tag.clone(), id);
        }
        self.revisions.push(Revision {
            id,
            kind,
            changeset,
            timestamp: Utc::now(),
            tag,
            metadata,
        });
        id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: RevisionId) -> Option<&Revision> {
        let index = usize::try_from(id.0.checked_sub(1)?).ok()?;
        self.revisions.get(index)
    }

    #[must_use]
    pub fn first(&self) -> Option<&Revision> {
        self.revisions.first()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Revision> {
        self.revisions.last()
    }

    #[must_use]
    pub fn previous(&self, id: RevisionId) -> Option<&Revision> {
        self.get(RevisionId(id.0.checked_sub(1)?))
    }

    #[must_use]
    pub fn next(&self, id: RevisionId) -> Option<&Revision> {
        self.get(RevisionId(id.0.saturating_add(1)))
    }

    #[must_use]
    pub fn by_tag(&self, tag: &str) -> Option<&Revision> {
        self.get(*self.by_tag.get(tag)?)
    }

    /// The revision in effect at a timestamp: the latest one whose
    /// timestamp is not after `at`.
    #[must_use]
    pub fn by_timestamp(&self, at: DateTime<Utc>) -> Option<&Revision> {
        self.revisions.iter().rev().find(|r| r.timestamp <= at)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Revision> {
        self.revisions.iter()
    }

    /// The most recent image recorded for a construct: the `after` image
    /// of the newest delta touching it, or its `before` image when that
    /// delta is a removal.
    #[must_use]
    pub fn last_image(&self, construct: ConstructId) -> Option<&FrozenConstruct> {
        for revision in self.revisions.iter().rev() {
            for delta in revision.changeset.deltas.iter().rev() {
                if delta.construct == construct {
                    return delta.after.as_ref().or(delta.before.as_ref());
                }
            }
        }
        None
    }
}

// =============================================================================
// LAZY RESOLUTION
// =============================================================================

/// What a [`FrozenRef`] resolved to.
#[derive(Debug)]
pub enum ResolvedRef<'a> {
    /// The construct still exists; the current record.
    Live(Construct),
    /// The construct is gone; its last recorded image.
    Frozen(&'a FrozenConstruct),
}

/// Long-lived handle to a construct that survives the construct's removal.
///
/// While the construct exists, `resolve` returns the live record and no
/// snapshot is taken. Once it is gone, the last image recorded in the
/// revision log is returned and memoized, so later resolutions do not
/// depend on the log again.
#[derive(Debug, Serialize, Deserialize)]
pub struct FrozenRef {
    id: ConstructId,
    #[serde(skip)]
    memo: OnceCell<Box<FrozenConstruct>>,
}

impl FrozenRef {
    #[must_use]
    pub fn new(id: ConstructId) -> Self {
        Self {
            id,
            memo: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ConstructId {
        self.id
    }

    /// Resolve against the current base store and its revision log.
    ///
    /// `None` means the construct neither exists nor left any image in
    /// history.
    pub fn resolve(&self, store: &MemoryStore) -> Option<ResolvedRef<'_>> {
        if let Some(live) = store.construct(self.id) {
            return Some(ResolvedRef::Live(live));
        }
        if let Some(frozen) = self.memo.get() {
            return Some(ResolvedRef::Frozen(frozen.as_ref()));
        }
        let image = store.revision_log().last_image(self.id)?.clone();
        let memoized = self.memo.get_or_init(|| Box::new(image));
        Some(ResolvedRef::Frozen(memoized.as_ref()))
    }
}

impl Clone for FrozenRef {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            memo: self.memo.clone(),
        }
    }
}

impl PartialEq for FrozenRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FrozenRef {}

// =============================================================================
// TESTS
// =============================================================================

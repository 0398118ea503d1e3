//! # Construct Records
//!
//! The data model: thin records holding scalars plus the ids of referenced
//! constructs, a tagged `Construct` enum over them, and the capability
//! traits (`Typed`, `Scoped`, `Reifiable`) that replace per-backend
//! parallel class trees.
//!
//! Cross-references are always `ConstructId`s into the owning map's arena;
//! records never hold live references, so topic/association/role cycles
//! carry no ownership problems.

use crate::types::{ConstructId, ConstructKind, Locator, ScopeId};
use crate::LiteralValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// RECORDS
// =============================================================================

/// A topic. Identifier sets live in the identity store; characteristics
/// and type adjacency live in the characteristics store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: ConstructId,
}

/// A typed, scoped, reifiable n-ary relation owning a set of roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub id: ConstructId,
    pub type_id: ConstructId,
    pub scope: ScopeId,
}

/// One participant of an association: role type plus player topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: ConstructId,
    /// The owning association.
    pub parent: ConstructId,
    pub type_id: ConstructId,
    pub player: ConstructId,
}

/// A typed, scoped, reifiable label of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name {
    pub id: ConstructId,
    /// The owning topic.
    pub parent: ConstructId,
    pub type_id: ConstructId,
    pub scope: ScopeId,
    pub value: String,
}

/// A typed, scoped, reifiable literal characteristic of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: ConstructId,
    /// The owning topic.
    pub parent: ConstructId,
    pub type_id: ConstructId,
    pub scope: ScopeId,
    pub value: LiteralValue,
}

/// A context-specific alternate form of a name, in a narrower scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: ConstructId,
    /// The owning name.
    pub parent: ConstructId,
    pub scope: ScopeId,
    pub value: LiteralValue,
}

// =============================================================================
// TAGGED CONSTRUCT
// =============================================================================

/// Tagged variant over all construct records.
///
/// One enum instead of parallel per-backend hierarchies: the capability
/// set of a construct is expressed by which traits its record implements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Construct {
    Topic(Topic),
    Association(Association),
    Role(Role),
    Name(Name),
    Occurrence(Occurrence),
    Variant(Variant),
}

impl Construct {
    /// The construct's id.
    #[must_use]
    pub fn id(&self) -> ConstructId {
        match self {
            Construct::Topic(t) => t.id,
            Construct::Association(a) => a.id,
            Construct::Role(r) => r.id,
            Construct::Name(n) => n.id,
            Construct::Occurrence(o) => o.id,
            Construct::Variant(v) => v.id,
        }
    }

    /// The construct's kind discriminant.
    #[must_use]
    pub fn kind(&self) -> ConstructKind {
        match self {
            Construct::Topic(_) => ConstructKind::Topic,
            Construct::Association(_) => ConstructKind::Association,
            Construct::Role(_) => ConstructKind::Role,
            Construct::Name(_) => ConstructKind::Name,
            Construct::Occurrence(_) => ConstructKind::Occurrence,
            Construct::Variant(_) => ConstructKind::Variant,
        }
    }

    /// The owning construct, if this is an owned characteristic or role.
    #[must_use]
    pub fn parent(&self) -> Option<ConstructId> {
        match self {
            Construct::Topic(_) | Construct::Association(_) => None,
            Construct::Role(r) => Some(r.parent),
            Construct::Name(n) => Some(n.parent),
            Construct::Occurrence(o) => Some(o.parent),
            Construct::Variant(v) => Some(v.parent),
        }
    }

    /// The construct's type topic, when the kind is typed.
    #[must_use]
    pub fn type_id(&self) -> Option<ConstructId> {
        match self {
            Construct::Association(a) => Some(a.type_id),
            Construct::Role(r) => Some(r.type_id),
            Construct::Name(n) => Some(n.type_id),
            Construct::Occurrence(o) => Some(o.type_id),
            Construct::Topic(_) | Construct::Variant(_) => None,
        }
    }

    /// The construct's scope, when the kind is scoped.
    #[must_use]
    pub fn scope(&self) -> Option<ScopeId> {
        match self {
            Construct::Association(a) => Some(a.scope),
            Construct::Name(n) => Some(n.scope),
            Construct::Occurrence(o) => Some(o.scope),
            Construct::Variant(v) => Some(v.scope),
            Construct::Topic(_) | Construct::Role(_) => None,
        }
    }
}

// =============================================================================
// CAPABILITY TRAITS
// =============================================================================

/// Constructs carrying a type topic.
pub trait Typed {
    fn type_id(&self) -> ConstructId;
    fn set_type_id(&mut self, type_id: ConstructId);
}

/// Constructs carrying a scope.
pub trait Scoped {
    fn scope(&self) -> ScopeId;
    fn set_scope(&mut self, scope: ScopeId);
}

/// Constructs that may be reified by a topic. The reifier relation itself
/// lives in the reification store; the trait marks the capability.
pub trait Reifiable {
    fn reifiable_id(&self) -> ConstructId;
}

macro_rules! impl_typed {
    ($($ty:ty),*) => {$(
        impl Typed for $ty {
            fn type_id(&self) -> ConstructId {
                self.type_id
            }
            fn set_type_id(&mut self, type_id: ConstructId) {
                self.type_id = type_id;
            }
        }
    )*};
}

macro_rules! impl_scoped {
    ($($ty:ty),*) => {$(
        impl Scoped for $ty {
            fn scope(&self) -> ScopeId {
                self.scope
            }
            fn set_scope(&mut self, scope: ScopeId) {
                self.scope = scope;
            }
        }
    )*};
}

macro_rules! impl_reifiable {
    ($($ty:ty),*) => {$(
        impl Reifiable for $ty {
            fn reifiable_id(&self) -> ConstructId {
                self.id
            }
        }
    )*};
}

impl_typed!(Association, Role, Name, Occurrence);
impl_scoped!(Association, Name, Occurrence, Variant);
impl_reifiable!(Association, Role, Name, Occurrence, Variant);

// =============================================================================
// IDENTIFIER SETS
// =============================================================================

/// The three disjoint identifier sets of a topic (item identifiers may
/// also be carried by non-topic constructs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IdentifierSets {
    pub subject_identifiers: BTreeSet<Locator>,
    pub subject_locators: BTreeSet<Locator>,
    pub item_identifiers: BTreeSet<Locator>,
}

impl IdentifierSets {
    /// Whether all three sets are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subject_identifiers.is_empty()
            && self.subject_locators.is_empty()
            && self.item_identifiers.is_empty()
    }

    /// All identifiers with their namespace, in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = (crate::IdentifierKind, &Locator)> {
        use crate::IdentifierKind as K;
        self.subject_identifiers
            .iter()
            .map(|l| (K::SubjectIdentifier, l))
            .chain(self.subject_locators.iter().map(|l| (K::SubjectLocator, l)))
            .chain(self.item_identifiers.iter().map(|l| (K::ItemIdentifier, l)))
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! # topiq-core
//!
//! An embeddable semantic graph engine built on the Topic Maps data
//! model: topics, associations, roles, names, occurrences and variants,
//! with locator-based identity, canonical scopes, reification, identity
//! merging, transactional isolation and revision history.
//!
//! ## Architecture
//!
//! - The base store ([`MemoryStore`]) is plain shared mutable state with
//!   no internal locking; [`ConcurrentTopicMap`] is the sharing wrapper.
//! - All graph semantics are written once against the [`StoreView`]
//!   trait, so merge, constraint checks and every operation behave
//!   identically in the base store and inside a transaction overlay.
//! - Transactions are copy-on-write overlays committed atomically; each
//!   commit appends a [`Revision`] with full before/after images.
//! - No async, no network dependencies, no file I/O (snapshots are pure
//!   byte transformations).

// =============================================================================
// MODULES
// =============================================================================

pub mod characteristics;
pub mod engine;
pub mod formats;
pub mod identity;
pub mod index;
pub mod merge;
pub mod model;
mod overlay;
pub mod primitives;
pub mod reification;
pub mod revision;
pub mod scope;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ConstructId, ConstructKind, EngineError, GeoCoordinate, IdentifierKind, LiteralValue, Locator,
    RevisionId, ScopeId, TxnId,
};

// =============================================================================
// RE-EXPORTS: Model & Stores
// =============================================================================

pub use model::{
    Association, Construct, IdentifierSets, Name, Occurrence, Reifiable, Role, Scoped, Topic,
    Typed, Variant,
};
pub use store::{ConstructBackend, MemoryStore, Page, StoreReads, StoreView};

// =============================================================================
// RE-EXPORTS: Engine & Merge
// =============================================================================

pub use engine::{TopicMapEngine, Transaction, View};
pub use merge::{merge_topics, replace_topic};

// =============================================================================
// RE-EXPORTS: History & Formats
// =============================================================================

pub use formats::{engine_from_bytes, engine_to_bytes};
pub use revision::{
    ChangeKind, Changeset, Delta, EventKind, FrozenConstruct, FrozenRef, ResolvedRef, Revision,
    RevisionLog,
};

// =============================================================================
// RE-EXPORTS: Indexes & Concurrency
// =============================================================================

pub use index::{
    ConcurrentTopicMap, IdentityIndex, LiteralIndex, ScopedIndex, SupertypeSubtypeIndex,
    TypeInstanceIndex,
};

//! # trust-graph
//!
//! Relationship-based access control over a tuple graph.
//!
//! Edges are [`Tuple`]s `(object, relation, subject)`. [`LocalGraph`]
//! answers "does subject hold relation on object" from a [`TupleStore`],
//! and [`CachedGraph`] puts a TTL cache in front of any [`GraphClient`].
//!
//! ## Key invariants
//!
//! - **Implication is declarative**: owner ⊇ editor ⊇ viewer comes from a
//!   validated [`RelationHierarchy`] table, not code.
//! - **Bounded propagation**: only `member` and `can_act_for` edges are
//!   traversed as hops, and traversal stops at depth 3.
//! - **Write-invalidate**: every upsert through a [`CachedGraph`] clears it
//!   and publishes an invalidation event.

pub mod cache;
pub mod error;
pub mod graph;
pub mod local;
pub mod relations;
pub mod store;
pub mod tuple;

pub use cache::CachedGraph;
pub use error::GraphError;
pub use graph::{
    CheckResult, GraphClient, GraphInvalidationPublisher, NoopGraphInvalidation, SOURCE_CACHE,
    SOURCE_LOCAL,
};
pub use local::{LocalGraph, DEFAULT_HOP_RELATIONS, DEFAULT_MAX_DEPTH};
pub use relations::RelationHierarchy;
pub use store::{MemoryTupleStore, TupleStore};
pub use tuple::{GraphExpansion, RelationRef, Tuple};

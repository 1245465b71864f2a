// graph.rs - The GraphClient contract shared by every graph backend.
//
// LocalGraph (in-process traversal) and CachedGraph (TTL decorator) both
// implement it; an external ReBAC service would too. Checks report which
// layer answered through `source`.

use crate::error::GraphError;
use crate::tuple::{GraphExpansion, RelationRef, Tuple};

/// Answer produced by the in-process traversal.
pub const SOURCE_LOCAL: &str = "local";
/// Answer served from a CachedGraph entry.
pub const SOURCE_CACHE: &str = "cache";

/// Result of a relationship check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub allowed: bool,
    /// Which layer answered ("local", "cache", or a backend name).
    pub source: String,
}

impl CheckResult {
    pub fn new(allowed: bool, source: impl Into<String>) -> Self {
        Self {
            allowed,
            source: source.into(),
        }
    }
}

/// A relationship graph backend.
pub trait GraphClient: Send + Sync {
    /// Add one tuple.
    fn upsert(&self, tuple: &Tuple) -> Result<(), GraphError> {
        self.upsert_batch(std::slice::from_ref(tuple))
    }

    /// Add many tuples at once.
    fn upsert_batch(&self, tuples: &[Tuple]) -> Result<(), GraphError>;

    /// Does `subject` hold `relation` on `object`, directly, by implication,
    /// or through a bounded membership/delegation chain?
    fn check(
        &self,
        subject: &RelationRef,
        relation: &str,
        object: &RelationRef,
    ) -> Result<CheckResult, GraphError>;

    /// Direct subjects holding `relation` on `object`.
    fn expand(
        &self,
        relation: &str,
        object: &RelationRef,
        depth: i32,
    ) -> Result<GraphExpansion, GraphError>;
}

/// Notifies other processes that tuples changed so they can drop their
/// cached check results. The event carries no payload.
pub trait GraphInvalidationPublisher: Send + Sync {
    fn publish(&self);
}

/// Publisher for single-process deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGraphInvalidation;

impl GraphInvalidationPublisher for NoopGraphInvalidation {
    fn publish(&self) {}
}

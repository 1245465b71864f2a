// error.rs - Error types for the relationship graph.

use thiserror::Error;

/// Errors that can occur during graph operations.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A tuple or check named an empty or malformed relation.
    #[error("invalid relation '{0}'")]
    InvalidRelation(String),

    /// A node reference could not be parsed (expected "namespace:id").
    #[error("invalid node reference '{0}': expected namespace:id")]
    InvalidRef(String),

    /// The tuple store could not be reached. Callers treat this as a failed
    /// check.
    #[error("tuple store unavailable: {0}")]
    StoreUnavailable(String),

    /// A relation hierarchy table is malformed (cycle or empty name).
    #[error("invalid relation hierarchy: {0}")]
    InvalidHierarchy(String),
}

// error.rs - Error types for the policy subsystem.
//
// Lifecycle failures are split into "not found" and "conflict" families so
// callers can react procedurally: a conflict usually means more approvals are
// needed, a not-found means the caller addressed the wrong version.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during policy operations.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The requested policy does not exist.
    #[error("policy not found: {0}")]
    NotFound(Uuid),

    /// The requested policy version does not exist.
    #[error("policy {policy_id} has no version {version}")]
    VersionNotFound { policy_id: Uuid, version: u32 },

    /// Activation was attempted on a version that is not approved.
    #[error("cannot activate version {version}: status must be 'approved' (got '{status}')")]
    NotApproved { version: u32, status: String },

    /// A status change that the version lifecycle does not permit.
    #[error("invalid transition from {from} to {to} for policy {policy_id} version {version}")]
    InvalidTransition {
        policy_id: Uuid,
        version: u32,
        from: String,
        to: String,
    },

    /// The policy body could not be compiled by its engine.
    #[error("invalid policy body: {0}")]
    InvalidBody(String),

    /// No evaluator is registered for the engine type.
    #[error("unsupported engine '{0}'")]
    UnsupportedEngine(String),

    /// An evaluator was handed a compiled artifact produced by another engine.
    #[error("bad compiled policy type for engine '{0}'")]
    BadCompiledPolicy(String),

    /// The backing store failed.
    #[error("policy storage error: {0}")]
    Storage(String),
}

impl PolicyError {
    /// True for lifecycle conflicts (e.g. activating an unapproved version).
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            PolicyError::NotApproved { .. } | PolicyError::InvalidTransition { .. }
        )
    }

    /// True when the addressed policy or version does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PolicyError::NotFound(_) | PolicyError::VersionNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_and_not_found_are_disjoint() {
        let conflict = PolicyError::NotApproved {
            version: 2,
            status: "draft".to_string(),
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_not_found());

        let missing = PolicyError::VersionNotFound {
            policy_id: Uuid::new_v4(),
            version: 9,
        };
        assert!(missing.is_not_found());
        assert!(!missing.is_conflict());
    }

    #[test]
    fn not_approved_message_names_status() {
        let err = PolicyError::NotApproved {
            version: 3,
            status: "draft".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cannot activate version 3: status must be 'approved' (got 'draft')"
        );
    }
}

// model.rs - Policy, version, assignment and rollout records.
//
// A Policy is created once and never changes; all evolution happens through
// PolicyVersions. Version status moves forward only:
//
//   Draft → Approved → Active
//
// with one sanctioned exception: activating a version demotes every sibling
// version of the same policy back to Draft, so at most one version is Active.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical;

/// Engine type of the built-in rule DSL.
pub const ENGINE_AURA_JSON: &str = "aurajson";

/// Engine type reserved for Rego-compatible evaluators supplied by plugins.
pub const ENGINE_REGO: &str = "rego";

/// A named, engine-typed authorization artifact owned by an org.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Policy {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    /// Which evaluator compiles this policy's versions (e.g. "aurajson").
    pub engine_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a policy version.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    Approved,
    Active,
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionStatus::Draft => write!(f, "draft"),
            VersionStatus::Approved => write!(f, "approved"),
            VersionStatus::Active => write!(f, "active"),
        }
    }
}

impl VersionStatus {
    /// Check whether moving from this status to `next` is a forward step.
    ///
    /// Re-approving an approved version is a no-op and allowed, because the
    /// approval threshold can be crossed more than once as approvers trickle in.
    pub fn can_transition_to(&self, next: VersionStatus) -> bool {
        matches!(
            (self, next),
            (VersionStatus::Draft, VersionStatus::Approved)
                | (VersionStatus::Approved, VersionStatus::Approved)
                | (VersionStatus::Approved, VersionStatus::Active)
        )
    }
}

/// An immutable snapshot of a policy body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyVersion {
    pub policy_id: Uuid,
    /// Monotonic per policy, starting at 1.
    pub version: u32,
    /// Engine-specific JSON body.
    pub body: serde_json::Value,
    /// SHA-256 of the canonical body, hex-encoded.
    pub checksum: String,
    pub status: VersionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
}

impl PolicyVersion {
    /// Build a fresh draft version.
    pub fn draft(
        policy_id: Uuid,
        version: u32,
        body: serde_json::Value,
        created_by: Option<Uuid>,
    ) -> Self {
        let checksum = canonical::sha256_hex(canonical::to_canonical_string(&body).as_bytes());
        Self {
            policy_id,
            version,
            body,
            checksum,
            status: VersionStatus::Draft,
            created_by,
            created_at: Utc::now(),
            approved_by: None,
            approved_at: None,
            activated_at: None,
        }
    }
}

/// One approver's sign-off on a version. Unique per (policy, version, user).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyApproval {
    pub policy_id: Uuid,
    pub version: u32,
    pub user_id: Uuid,
    pub approved_at: DateTime<Utc>,
}

/// The kind of scope a policy is bound to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Org,
    Team,
    Agent,
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeType::Org => write!(f, "org"),
            ScopeType::Team => write!(f, "team"),
            ScopeType::Agent => write!(f, "agent"),
        }
    }
}

/// Binds a policy to a scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyAssignment {
    pub policy_id: Uuid,
    pub scope_type: ScopeType,
    pub scope_id: String,
    pub created_at: DateTime<Utc>,
}

/// Canary override: route `percent` of requests to `version`.
///
/// Read at decision time only; never changes version status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyRollout {
    pub org_id: Uuid,
    pub policy_id: Uuid,
    pub version: u32,
    /// 0 to 100 inclusive.
    pub percent: u8,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A policy together with its currently active version.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveAssignment {
    pub policy: Policy,
    pub version: PolicyVersion,
}

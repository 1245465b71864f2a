// event.rs - Ledger entry data model.
//
// Each entry belongs to one organization's chain: `seq` counts from 1 per org
// and `previous_hash` is the hash of that org's previous raw JSON line. Entries
// for platform-level actions (policy lifecycle) use the nil org id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of event an entry records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A decision trace was persisted for a verify request.
    DecisionTraceRecorded,
    /// A request crossed an org boundary under a federation contract.
    FederationBoundaryCrossing,
    /// A cross-org request fell outside the contract's scope.
    FederationScopeDenied,
    /// An approver signed off on a policy version.
    PolicyVersionApproval,
    /// A policy version became active.
    PolicyVersionActivate,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::DecisionTraceRecorded => "decision_trace_recorded",
            AuditAction::FederationBoundaryCrossing => "federation_boundary_crossing",
            AuditAction::FederationScopeDenied => "federation_scope_denied",
            AuditAction::PolicyVersionApproval => "policy_version_approval",
            AuditAction::PolicyVersionActivate => "policy_version_activate",
        };
        write!(f, "{}", s)
    }
}

/// An event to be appended. The ledger assigns chain fields on append.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub org_id: Uuid,
    pub action: AuditAction,
    pub actor_user: Option<Uuid>,
    pub actor_agent: Option<String>,
    pub payload: serde_json::Value,
}

impl AuditRecord {
    pub fn new(org_id: Uuid, action: AuditAction, payload: serde_json::Value) -> Self {
        Self {
            org_id,
            action,
            actor_user: None,
            actor_agent: None,
            payload,
        }
    }

    pub fn with_actor_user(mut self, user: Uuid) -> Self {
        self.actor_user = Some(user);
        self
    }

    pub fn with_actor_agent(mut self, agent: impl Into<String>) -> Self {
        self.actor_agent = Some(agent.into());
        self
    }
}

/// One line of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub org_id: Uuid,
    /// 1-based position in the org's chain.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_user: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_agent: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Hash of the org's previous line; None for the first entry.
    pub previous_hash: Option<String>,
}

impl LedgerEntry {
    pub(crate) fn chained(record: AuditRecord, seq: u64, previous_hash: Option<String>) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            org_id: record.org_id,
            seq,
            timestamp: Utc::now(),
            action: record.action,
            actor_user: record.actor_user,
            actor_agent: record.actor_agent,
            payload: record.payload,
            previous_hash,
        }
    }
}

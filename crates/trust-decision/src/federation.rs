// federation.rs - Cross-org federation contracts and scope matching.
//
// A request whose target org differs from the caller's org needs an active
// contract caller→target. The latest active contract wins. Its scope lists
// the actions and resources the caller may touch in the target org; an empty
// list leaves that dimension unrestricted.
//
// Allow-list entries:
//   "*"            everything
//   "re:<regex>"   regular expression (unanchored unless the pattern anchors)
//   "invoice:*"    literal prefix; only a trailing `*` is special
//   "read"         exact match
// Regexes that fail to compile never match.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DecisionError;

pub const REASON_NO_CONTRACT: &str = "No federation contract";
pub const REASON_ACTION_OUT_OF_SCOPE: &str = "Federation: action not allowed by contract";
pub const REASON_RESOURCE_OUT_OF_SCOPE: &str = "Federation: resource not allowed by contract";
pub const REASON_ATTESTATION_REQUIRED: &str = "Cross-org requires attestation auth";

/// Authentication kind that satisfies zero-trust cross-org mode.
pub const AUTHN_ATTEST: &str = "attest";

/// What a contract lets the caller do in the counterparty org.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationScope {
    #[serde(default)]
    pub allowed_actions: Vec<String>,
    #[serde(default)]
    pub allowed_resources: Vec<String>,
}

impl FederationScope {
    pub fn permits_action(&self, action: &str) -> bool {
        action.is_empty() || self.allowed_actions.is_empty() || matches_allowed(action, &self.allowed_actions)
    }

    pub fn permits_resource(&self, resource: &str) -> bool {
        resource.is_empty()
            || self.allowed_resources.is_empty()
            || matches_allowed(resource, &self.allowed_resources)
    }
}

/// An agreement letting `org_id` act in `counterparty_org_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationContract {
    pub org_id: Uuid,
    pub counterparty_org_id: Uuid,
    #[serde(default)]
    pub scope: FederationScope,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

/// Lookup of federation contracts.
pub trait FederationStore: Send + Sync {
    /// The most recently created active contract org→counterparty.
    fn active_contract(
        &self,
        org_id: Uuid,
        counterparty_org_id: Uuid,
    ) -> Result<Option<FederationContract>, DecisionError>;
}

/// In-memory contract store.
#[derive(Default)]
pub struct MemoryFederationStore {
    contracts: RwLock<Vec<FederationContract>>,
}

impl MemoryFederationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, contract: FederationContract) -> Result<(), DecisionError> {
        self.contracts
            .write()
            .map_err(|_| DecisionError::Store("federation store lock poisoned".into()))?
            .push(contract);
        Ok(())
    }
}

impl FederationStore for MemoryFederationStore {
    fn active_contract(
        &self,
        org_id: Uuid,
        counterparty_org_id: Uuid,
    ) -> Result<Option<FederationContract>, DecisionError> {
        let contracts = self
            .contracts
            .read()
            .map_err(|_| DecisionError::Store("federation store lock poisoned".into()))?;
        Ok(contracts
            .iter()
            .filter(|c| c.active && c.org_id == org_id && c.counterparty_org_id == counterparty_org_id)
            .max_by_key(|c| c.created_at)
            .cloned())
    }
}

/// Does `value` match any allow-list entry?
pub fn matches_allowed(value: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|entry| matches_entry(value, entry))
}

fn matches_entry(value: &str, entry: &str) -> bool {
    if entry == "*" {
        return true;
    }
    if let Some(pattern) = entry.strip_prefix("re:") {
        return match regex::Regex::new(pattern) {
            Ok(re) => re.is_match(value),
            Err(e) => {
                tracing::warn!(entry, error = %e, "invalid regex in federation scope");
                false
            }
        };
    }
    if let Some(prefix) = entry.strip_suffix('*') {
        return value.starts_with(prefix);
    }
    value == entry
}

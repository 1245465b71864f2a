// decision.rs - Decision and explainability trace types.
//
// Every evaluation produces a Decision. The attached Trace records which rules
// were inspected and which matched, so a decision can be replayed and
// explained to an auditor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of evaluating a request against a policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub allow: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub require_approval: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
}

impl Decision {
    /// A bare deny with an explanatory reason and no trace.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: reason.into(),
            trace_id: String::new(),
            trace: None,
            require_approval: false,
            hints: Vec::new(),
        }
    }
}

/// Caller identity captured at evaluation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrincipalTrace {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub org_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spiffe_id: Option<String>,
    /// apikey | spiffe | oidc | attest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authn_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_fingerprint: Option<String>,
}

/// One rule's evaluation result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleTrace {
    pub rule_id: String,
    pub matched: bool,
    pub effect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Explainability record attached to a Decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trace {
    /// Filled in by the orchestrator once the policy is known.
    pub policy_id: Uuid,
    pub policy_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<PrincipalTrace>,
    pub evaluated_rules: Vec<RuleTrace>,
    #[serde(default)]
    pub input_context: serde_json::Value,
    pub duration_ms: u64,
    pub at: DateTime<Utc>,
    pub engine: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validations: Vec<String>,
}

impl Trace {
    /// Start an empty trace for the given engine and input.
    pub fn begin(engine: impl Into<String>, input_context: serde_json::Value) -> Self {
        Self {
            policy_id: Uuid::nil(),
            policy_version: 0,
            principal: None,
            evaluated_rules: Vec::new(),
            input_context,
            duration_ms: 0,
            at: Utc::now(),
            engine: engine.into(),
            validations: Vec::new(),
        }
    }
}

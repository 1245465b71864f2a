// fixture.rs - JSON world description for `trustd verify`.
//
// {
//   "policies":  [{ "org_id", "name", "engine_type"?, "versions": [body, ...],
//                   "active_version"?, "simulate_with"?, "rollout"?: {"version", "percent"} }],
//   "tuples":    [{ "object": "org:<id>", "relation": "can_act_for", "subject": "agent:a1" }],
//   "contracts": [FederationContract],
//   "requests":  [VerifyRequest]
// }
//
// Policies go through the real lifecycle: each version is compile-checked,
// the active one collects `approvals_required` synthetic approvals and must
// pass its activation simulation against `simulate_with`.

use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use trust_decision::{
    FederationContract, MemoryFederationStore, PolicyLifecycle, VerifyRequest,
};
use trust_graph::{GraphClient, RelationRef, Tuple};
use trust_policy::{ScopeType, ENGINE_AURA_JSON};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub policies: Vec<FixturePolicy>,
    #[serde(default)]
    pub tuples: Vec<FixtureTuple>,
    #[serde(default)]
    pub contracts: Vec<FederationContract>,
    #[serde(default)]
    pub requests: Vec<VerifyRequest>,
}

#[derive(Debug, Deserialize)]
pub struct FixturePolicy {
    pub org_id: Uuid,
    pub name: String,
    #[serde(default = "default_engine")]
    pub engine_type: String,
    pub versions: Vec<Value>,
    #[serde(default)]
    pub active_version: Option<u32>,
    #[serde(default)]
    pub simulate_with: Value,
    #[serde(default)]
    pub rollout: Option<FixtureRollout>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureRollout {
    pub version: u32,
    pub percent: u32,
}

#[derive(Debug, Deserialize)]
pub struct FixtureTuple {
    pub object: String,
    pub relation: String,
    pub subject: String,
}

fn default_engine() -> String {
    ENGINE_AURA_JSON.to_string()
}

impl FixtureTuple {
    fn to_tuple(&self) -> anyhow::Result<Tuple> {
        let object = RelationRef::from_str(&self.object)?;
        let subject = RelationRef::from_str(&self.subject)?;
        Ok(Tuple::new(&object, self.relation.clone(), &subject))
    }
}

impl Fixture {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load policies, tuples and contracts. Returns the requests to run.
    pub fn install(
        self,
        lifecycle: &PolicyLifecycle,
        graph: &dyn GraphClient,
        federation: &MemoryFederationStore,
        approvals_required: usize,
    ) -> anyhow::Result<Vec<VerifyRequest>> {
        for p in &self.policies {
            install_policy(lifecycle, p, approvals_required)
                .with_context(|| format!("installing policy '{}'", p.name))?;
        }

        let tuples = self
            .tuples
            .iter()
            .map(FixtureTuple::to_tuple)
            .collect::<anyhow::Result<Vec<_>>>()?;
        if !tuples.is_empty() {
            graph.upsert_batch(&tuples)?;
        }

        for contract in self.contracts {
            federation.insert(contract)?;
        }
        tracing::info!(
            policies = self.policies.len(),
            tuples = tuples.len(),
            requests = self.requests.len(),
            "fixture installed"
        );
        Ok(self.requests)
    }
}

fn install_policy(
    lifecycle: &PolicyLifecycle,
    p: &FixturePolicy,
    approvals_required: usize,
) -> anyhow::Result<()> {
    let policy = lifecycle.create_policy(p.org_id, &p.name, &p.engine_type, None)?;
    for body in &p.versions {
        lifecycle.add_version(policy.id, body.clone(), None)?;
    }
    if let Some(version) = p.active_version {
        for _ in 0..approvals_required {
            lifecycle.approve(policy.id, version, Uuid::new_v4())?;
        }
        lifecycle.activate(policy.id, version, &p.simulate_with)?;
        lifecycle.assign(policy.id, ScopeType::Org, &p.org_id.to_string())?;
    }
    if let Some(rollout) = &p.rollout {
        lifecycle.set_rollout(p.org_id, policy.id, rollout.version, rollout.percent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_fixture_parses() {
        let org = Uuid::new_v4();
        let raw = format!(
            r#"{{
                "policies": [{{"org_id": "{org}", "name": "p", "versions": [{{"rules": []}}]}}],
                "tuples": [{{"object": "org:{org}", "relation": "can_act_for", "subject": "agent:a1"}}],
                "requests": [{{"org_id": "{org}", "action": "read"}}]
            }}"#
        );
        let fixture = Fixture::parse(&raw).unwrap();
        assert_eq!(fixture.policies[0].engine_type, "aurajson");
        assert!(fixture.policies[0].active_version.is_none());
        assert!(fixture.contracts.is_empty());
        let tuple = fixture.tuples[0].to_tuple().unwrap();
        assert_eq!(tuple.subject_id, "a1");
        assert_eq!(fixture.requests[0].action, "read");
    }

    #[test]
    fn bad_tuple_ref_is_an_error() {
        let t = FixtureTuple {
            object: "no-namespace".into(),
            relation: "member".into(),
            subject: "user:a".into(),
        };
        assert!(t.to_tuple().is_err());
    }
}

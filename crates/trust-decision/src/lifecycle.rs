// lifecycle.rs - Policy authoring workflow on top of the repository.
//
// The repository enforces the status state machine. This service adds the
// surrounding rules:
//
// - bodies are compiled before they are stored or approved, so a malformed
//   body is rejected at submit time rather than at decision time
// - approval needs `approvals_required` distinct approvers
// - activation must first pass a simulation against a caller-supplied
//   context ("simulate before activate")
// - every mutation invalidates the compiled cache for the policy and is
//   published so other processes can do the same
//
// Lifecycle audit entries go on the platform chain (nil org id) with the
// owning org in the payload.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use trust_audit::{AuditAction, AuditRecord, AuditSink};
use trust_policy::{
    CompiledCache, CompiledPolicy, Decision, EvaluatorRegistry, Policy, PolicyAssignment,
    PolicyRepository, PolicyRollout, PolicyVersion, ScopeType, VersionStatus,
};
use uuid::Uuid;

use crate::context::canonicalize;
use crate::error::DecisionError;

/// Notifies other processes that a policy's compiled artifacts are stale.
pub trait PolicyInvalidationPublisher: Send + Sync {
    fn publish(&self, policy_id: Uuid);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPolicyInvalidation;

impl PolicyInvalidationPublisher for NoopPolicyInvalidation {
    fn publish(&self, _policy_id: Uuid) {}
}

/// Result of one approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub policy_id: Uuid,
    pub version: u32,
    /// Distinct approvers so far.
    pub approvals: usize,
    /// Whether the version is now approved (or already active).
    pub approved: bool,
}

pub struct PolicyLifecycle {
    repo: Arc<dyn PolicyRepository>,
    registry: Arc<EvaluatorRegistry>,
    cache: Arc<CompiledCache>,
    audit: Option<Arc<dyn AuditSink>>,
    publisher: Arc<dyn PolicyInvalidationPublisher>,
    approvals_required: usize,
}

impl PolicyLifecycle {
    pub fn new(
        repo: Arc<dyn PolicyRepository>,
        registry: Arc<EvaluatorRegistry>,
        cache: Arc<CompiledCache>,
        approvals_required: usize,
    ) -> Self {
        Self {
            repo,
            registry,
            cache,
            audit: None,
            publisher: Arc::new(NoopPolicyInvalidation),
            approvals_required: approvals_required.max(1),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn PolicyInvalidationPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn repository(&self) -> &Arc<dyn PolicyRepository> {
        &self.repo
    }

    pub fn create_policy(
        &self,
        org_id: Uuid,
        name: &str,
        engine_type: &str,
        created_by: Option<Uuid>,
    ) -> Result<Policy, DecisionError> {
        let policy = self.repo.create_policy(org_id, name, engine_type, created_by)?;
        tracing::info!(%org_id, policy_id = %policy.id, engine = engine_type, "policy created");
        Ok(policy)
    }

    /// Compile-check the body, then store it as the next draft version.
    pub fn add_version(
        &self,
        policy_id: Uuid,
        body: Value,
        created_by: Option<Uuid>,
    ) -> Result<PolicyVersion, DecisionError> {
        let policy = self.repo.get_policy(policy_id)?;
        self.compile(&policy, &body)?;
        let version = self.repo.add_version(policy_id, body, created_by)?;
        self.invalidate(policy_id);
        tracing::info!(%policy_id, version = version.version, "policy version added");
        Ok(version)
    }

    /// Record `user_id`'s approval and promote the version once enough
    /// distinct approvers have signed off.
    pub fn approve(
        &self,
        policy_id: Uuid,
        version: u32,
        user_id: Uuid,
    ) -> Result<ApprovalOutcome, DecisionError> {
        let policy = self.repo.get_policy(policy_id)?;
        let current = self.repo.get_version(policy_id, version)?;
        self.compile(&policy, &current.body)?;

        if !self.repo.record_approval(policy_id, version, user_id)? {
            tracing::debug!(%policy_id, version, %user_id, "duplicate approval ignored");
        }
        let approvals = self.repo.count_approvals(policy_id, version)?;

        let approved = match current.status {
            VersionStatus::Active => true,
            _ if approvals >= self.approvals_required => {
                self.repo.approve_version(policy_id, version, Some(user_id))?;
                true
            }
            _ => false,
        };

        self.invalidate(policy_id);
        self.audit(
            AuditRecord::new(
                Uuid::nil(),
                AuditAction::PolicyVersionApproval,
                json!({
                    "org_id": policy.org_id,
                    "policy_id": policy_id,
                    "version": version,
                    "approvals": approvals,
                }),
            )
            .with_actor_user(user_id),
        );
        tracing::info!(%policy_id, version, approvals, approved, "policy version approval recorded");

        Ok(ApprovalOutcome {
            policy_id,
            version,
            approvals,
            approved,
        })
    }

    /// Evaluate a version against `context` without changing any state.
    pub fn simulate(
        &self,
        policy_id: Uuid,
        version: u32,
        context: &Value,
    ) -> Result<Decision, DecisionError> {
        let policy = self.repo.get_policy(policy_id)?;
        let current = self.repo.get_version(policy_id, version)?;
        let compiled = self.compile(&policy, &current.body)?;
        self.evaluate(&policy, &compiled, context)
    }

    /// Activate an approved version after it evaluates to allow against
    /// `simulation_context`. Warms the cache with the new artifact.
    pub fn activate(
        &self,
        policy_id: Uuid,
        version: u32,
        simulation_context: &Value,
    ) -> Result<PolicyVersion, DecisionError> {
        let policy = self.repo.get_policy(policy_id)?;
        let current = self.repo.get_version(policy_id, version)?;
        let compiled = self.compile(&policy, &current.body)?;

        let simulated = self.evaluate(&policy, &compiled, simulation_context)?;
        if !simulated.allow {
            tracing::warn!(%policy_id, version, reason = %simulated.reason, "activation blocked by simulation");
            return Err(DecisionError::SimulationDenied(simulated.reason));
        }

        let activated = self.repo.activate_version(policy_id, version)?;
        self.cache.delete(policy_id, None);
        self.cache.put(policy_id, version, compiled);
        self.publisher.publish(policy_id);

        self.audit(AuditRecord::new(
            Uuid::nil(),
            AuditAction::PolicyVersionActivate,
            json!({"org_id": policy.org_id, "policy_id": policy_id, "version": version}),
        ));
        tracing::info!(%policy_id, version, "policy version activated");
        Ok(activated)
    }

    pub fn assign(
        &self,
        policy_id: Uuid,
        scope_type: ScopeType,
        scope_id: &str,
    ) -> Result<PolicyAssignment, DecisionError> {
        let assignment = self.repo.assign(policy_id, scope_type, scope_id)?;
        self.invalidate(policy_id);
        tracing::info!(%policy_id, %scope_type, scope_id, "policy assigned");
        Ok(assignment)
    }

    /// Route `percent` (clamped to 100) of the org's requests for this
    /// policy to `version`.
    pub fn set_rollout(
        &self,
        org_id: Uuid,
        policy_id: Uuid,
        version: u32,
        percent: u32,
    ) -> Result<PolicyRollout, DecisionError> {
        let rollout = PolicyRollout {
            org_id,
            policy_id,
            version,
            percent: percent.min(100) as u8,
            active: true,
            created_at: chrono::Utc::now(),
        };
        self.repo.put_rollout(rollout.clone())?;
        self.publisher.publish(policy_id);
        tracing::info!(%org_id, %policy_id, version, percent = rollout.percent, "canary rollout set");
        Ok(rollout)
    }

    fn compile(&self, policy: &Policy, body: &Value) -> Result<CompiledPolicy, DecisionError> {
        let evaluator = self.registry.get(&policy.engine_type)?;
        Ok(evaluator.compile(body)?)
    }

    fn evaluate(
        &self,
        policy: &Policy,
        compiled: &CompiledPolicy,
        context: &Value,
    ) -> Result<Decision, DecisionError> {
        let evaluator = self.registry.get(&policy.engine_type)?;
        Ok(evaluator.evaluate(compiled, &canonicalize(context))?)
    }

    fn invalidate(&self, policy_id: Uuid) {
        self.cache.delete(policy_id, None);
        self.publisher.publish(policy_id);
    }

    fn audit(&self, record: AuditRecord) {
        if let Some(audit) = &self.audit {
            let action = record.action;
            if let Err(e) = audit.record(record) {
                tracing::warn!(%action, error = %e, "audit append failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trust_audit::MemoryLedger;
    use trust_policy::{MemoryPolicyRepository, ENGINE_AURA_JSON};

    #[derive(Default)]
    struct CountingPublisher(AtomicUsize);

    impl PolicyInvalidationPublisher for CountingPublisher {
        fn publish(&self, _policy_id: Uuid) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn reads_only() -> Value {
        json!({"rules": [{"id": "r1", "effect": "allow", "when": {"action": {"eq": "read"}}}]})
    }

    fn test_lifecycle() -> (PolicyLifecycle, Arc<CompiledCache>, Arc<MemoryLedger>) {
        let cache = Arc::new(CompiledCache::new());
        let ledger = Arc::new(MemoryLedger::new());
        let lifecycle = PolicyLifecycle::new(
            Arc::new(MemoryPolicyRepository::new()),
            Arc::new(EvaluatorRegistry::with_builtin()),
            Arc::clone(&cache),
            2,
        )
        .with_audit(ledger.clone());
        (lifecycle, cache, ledger)
    }

    #[test]
    fn malformed_body_rejected_at_submit() {
        let (lc, _, _) = test_lifecycle();
        let policy = lc.create_policy(Uuid::new_v4(), "p", ENGINE_AURA_JSON, None).unwrap();
        let err = lc
            .add_version(policy.id, json!({"rules": [{"id": "x", "effect": "maybe"}]}), None)
            .unwrap_err();
        assert!(matches!(err, DecisionError::Policy(_)), "got {:?}", err);
        assert!(lc.repository().list_versions(policy.id).unwrap().is_empty());
    }

    #[test]
    fn approval_threshold_counts_distinct_users() {
        let (lc, _, ledger) = test_lifecycle();
        let policy = lc.create_policy(Uuid::new_v4(), "p", ENGINE_AURA_JSON, None).unwrap();
        lc.add_version(policy.id, reads_only(), None).unwrap();

        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let first = lc.approve(policy.id, 1, alice).unwrap();
        assert_eq!((first.approvals, first.approved), (1, false));
        let again = lc.approve(policy.id, 1, alice).unwrap();
        assert_eq!((again.approvals, again.approved), (1, false));
        let second = lc.approve(policy.id, 1, bob).unwrap();
        assert_eq!((second.approvals, second.approved), (2, true));

        let v = lc.repository().get_version(policy.id, 1).unwrap();
        assert_eq!(v.status, VersionStatus::Approved);
        assert_eq!(v.approved_by, Some(bob));

        let entries = ledger.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].action, AuditAction::PolicyVersionApproval);
        assert_eq!(entries[2].payload["approvals"], 2);
        assert_eq!(entries[2].actor_user, Some(bob));
    }

    #[test]
    fn activation_requires_allowing_simulation() {
        let (lc, cache, ledger) = test_lifecycle();
        let policy = lc.create_policy(Uuid::new_v4(), "p", ENGINE_AURA_JSON, None).unwrap();
        lc.add_version(policy.id, reads_only(), None).unwrap();
        lc.approve(policy.id, 1, Uuid::new_v4()).unwrap();
        lc.approve(policy.id, 1, Uuid::new_v4()).unwrap();

        match lc.activate(policy.id, 1, &json!({"action": "write"})) {
            Err(DecisionError::SimulationDenied(reason)) => {
                assert_eq!(reason, "No matching allow rule")
            }
            other => panic!("expected SimulationDenied, got {:?}", other),
        }
        assert!(cache.get(policy.id, 1).is_none());

        let v = lc.activate(policy.id, 1, &json!({"action": "read"})).unwrap();
        assert_eq!(v.status, VersionStatus::Active);
        assert!(cache.get(policy.id, 1).is_some());
        let last = ledger.entries().pop().unwrap();
        assert_eq!(last.action, AuditAction::PolicyVersionActivate);
        assert!(last.org_id.is_nil());
        assert_eq!(last.payload["org_id"], json!(policy.org_id));
    }

    #[test]
    fn activating_draft_is_a_conflict() {
        let (lc, _, _) = test_lifecycle();
        let policy = lc.create_policy(Uuid::new_v4(), "p", ENGINE_AURA_JSON, None).unwrap();
        lc.add_version(policy.id, reads_only(), None).unwrap();
        let err = lc.activate(policy.id, 1, &json!({"action": "read"})).unwrap_err();
        assert!(err.is_conflict(), "got {:?}", err);
        let missing = lc.activate(policy.id, 9, &json!({})).unwrap_err();
        assert!(missing.is_not_found(), "got {:?}", missing);
    }

    #[test]
    fn mutations_invalidate_and_publish() {
        let (lc, cache, _) = test_lifecycle();
        let publisher = Arc::new(CountingPublisher::default());
        let lc = lc.with_publisher(publisher.clone());
        let org = Uuid::new_v4();
        let policy = lc.create_policy(org, "p", ENGINE_AURA_JSON, None).unwrap();
        lc.add_version(policy.id, reads_only(), None).unwrap();

        cache.put(policy.id, 1, Arc::new(()));
        lc.assign(policy.id, ScopeType::Org, &org.to_string()).unwrap();
        assert!(cache.get(policy.id, 1).is_none());

        let rollout = lc.set_rollout(org, policy.id, 1, 250).unwrap();
        assert_eq!(rollout.percent, 100);
        assert_eq!(publisher.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn simulate_leaves_state_alone() {
        let (lc, cache, ledger) = test_lifecycle();
        let policy = lc.create_policy(Uuid::new_v4(), "p", ENGINE_AURA_JSON, None).unwrap();
        lc.add_version(policy.id, reads_only(), None).unwrap();
        let d = lc.simulate(policy.id, 1, &json!({"action": "read"})).unwrap();
        assert!(d.allow);
        assert_eq!(d.reason, "Matched allow rule");
        assert!(cache.is_empty());
        assert!(ledger.entries().is_empty());
        assert_eq!(
            lc.repository().get_version(policy.id, 1).unwrap().status,
            VersionStatus::Draft
        );
    }
}

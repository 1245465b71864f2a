// repository.rs - Policy Repository: CRUD and lifecycle transitions.
//
// The trait is the storage boundary; any backend (SQL, KV, remote service)
// can implement it. MemoryPolicyRepository is the reference implementation:
// every operation runs under one mutex, which gives the same atomicity a
// database transaction would:
//
// - add_version allocates max+1 and inserts in one step, so concurrent calls
//   on the same policy never hand out duplicate version numbers
// - activate_version demotes siblings and promotes the target in one step,
//   so two versions are never active at once
//
// No automatic retries: these are idempotent, caller-driven transitions.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error::PolicyError;
use crate::model::{
    ActiveAssignment, Policy, PolicyApproval, PolicyAssignment, PolicyRollout, PolicyVersion,
    ScopeType, VersionStatus,
};

/// Storage and lifecycle operations for policies.
pub trait PolicyRepository: Send + Sync {
    /// Create a policy. Policies are immutable once created.
    fn create_policy(
        &self,
        org_id: Uuid,
        name: &str,
        engine_type: &str,
        created_by: Option<Uuid>,
    ) -> Result<Policy, PolicyError>;

    fn get_policy(&self, policy_id: Uuid) -> Result<Policy, PolicyError>;

    /// Allocate the next version number (starting at 1) and store a draft.
    fn add_version(
        &self,
        policy_id: Uuid,
        body: Value,
        created_by: Option<Uuid>,
    ) -> Result<PolicyVersion, PolicyError>;

    fn get_version(&self, policy_id: Uuid, version: u32) -> Result<PolicyVersion, PolicyError>;

    /// All versions of a policy, newest first.
    fn list_versions(&self, policy_id: Uuid) -> Result<Vec<PolicyVersion>, PolicyError>;

    /// Bind a policy to a scope.
    fn assign(
        &self,
        policy_id: Uuid,
        scope_type: ScopeType,
        scope_id: &str,
    ) -> Result<PolicyAssignment, PolicyError>;

    /// Every (policy, active version) bound to the org, ordered by version
    /// descending.
    fn active_assignments_for_org(&self, org_id: Uuid)
        -> Result<Vec<ActiveAssignment>, PolicyError>;

    /// Record one approver's sign-off. Returns false when this user had
    /// already approved the version (no-op).
    fn record_approval(
        &self,
        policy_id: Uuid,
        version: u32,
        user_id: Uuid,
    ) -> Result<bool, PolicyError>;

    /// Number of distinct approvers of a version.
    fn count_approvals(&self, policy_id: Uuid, version: u32) -> Result<usize, PolicyError>;

    /// Mark a version approved. Callers invoke this once the approval
    /// threshold has been confirmed.
    fn approve_version(
        &self,
        policy_id: Uuid,
        version: u32,
        approved_by: Option<Uuid>,
    ) -> Result<PolicyVersion, PolicyError>;

    /// Promote an approved version to active and demote all of its siblings
    /// to draft. Fails with a conflict unless the version is approved.
    fn activate_version(&self, policy_id: Uuid, version: u32) -> Result<PolicyVersion, PolicyError>;

    /// Store a canary rollout.
    fn put_rollout(&self, rollout: PolicyRollout) -> Result<(), PolicyError>;

    /// The most recently created active rollout for (org, policy), if any.
    fn active_rollout(
        &self,
        org_id: Uuid,
        policy_id: Uuid,
    ) -> Result<Option<PolicyRollout>, PolicyError>;
}

#[derive(Default)]
struct RepoState {
    policies: HashMap<Uuid, Policy>,
    /// Versions per policy, in ascending version order.
    versions: HashMap<Uuid, Vec<PolicyVersion>>,
    approvals: Vec<PolicyApproval>,
    approval_keys: HashSet<(Uuid, u32, Uuid)>,
    assignments: Vec<PolicyAssignment>,
    rollouts: Vec<PolicyRollout>,
}

impl RepoState {
    fn policy(&self, policy_id: Uuid) -> Result<&Policy, PolicyError> {
        self.policies
            .get(&policy_id)
            .ok_or(PolicyError::NotFound(policy_id))
    }

    fn version_mut(
        &mut self,
        policy_id: Uuid,
        version: u32,
    ) -> Result<&mut PolicyVersion, PolicyError> {
        self.versions
            .get_mut(&policy_id)
            .and_then(|vs| vs.iter_mut().find(|v| v.version == version))
            .ok_or(PolicyError::VersionNotFound { policy_id, version })
    }

    fn version(&self, policy_id: Uuid, version: u32) -> Result<&PolicyVersion, PolicyError> {
        self.versions
            .get(&policy_id)
            .and_then(|vs| vs.iter().find(|v| v.version == version))
            .ok_or(PolicyError::VersionNotFound { policy_id, version })
    }
}

/// In-memory reference repository.
#[derive(Default)]
pub struct MemoryPolicyRepository {
    state: Mutex<RepoState>,
}

impl MemoryPolicyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, RepoState>, PolicyError> {
        self.state
            .lock()
            .map_err(|_| PolicyError::Storage("policy repository lock poisoned".to_string()))
    }
}

impl PolicyRepository for MemoryPolicyRepository {
    fn create_policy(
        &self,
        org_id: Uuid,
        name: &str,
        engine_type: &str,
        created_by: Option<Uuid>,
    ) -> Result<Policy, PolicyError> {
        let policy = Policy {
            id: Uuid::new_v4(),
            org_id,
            name: name.to_string(),
            engine_type: engine_type.to_string(),
            created_by,
            created_at: Utc::now(),
        };
        let mut state = self.lock()?;
        state.policies.insert(policy.id, policy.clone());
        tracing::info!(policy_id = %policy.id, %org_id, engine = engine_type, "created policy");
        Ok(policy)
    }

    fn get_policy(&self, policy_id: Uuid) -> Result<Policy, PolicyError> {
        self.lock()?.policy(policy_id).cloned()
    }

    fn add_version(
        &self,
        policy_id: Uuid,
        body: Value,
        created_by: Option<Uuid>,
    ) -> Result<PolicyVersion, PolicyError> {
        let mut state = self.lock()?;
        state.policy(policy_id)?;
        let versions = state.versions.entry(policy_id).or_default();
        let next = versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        let version = PolicyVersion::draft(policy_id, next, body, created_by);
        versions.push(version.clone());
        tracing::info!(%policy_id, version = next, "added policy version");
        Ok(version)
    }

    fn get_version(&self, policy_id: Uuid, version: u32) -> Result<PolicyVersion, PolicyError> {
        self.lock()?.version(policy_id, version).cloned()
    }

    fn list_versions(&self, policy_id: Uuid) -> Result<Vec<PolicyVersion>, PolicyError> {
        let state = self.lock()?;
        state.policy(policy_id)?;
        let mut versions = state.versions.get(&policy_id).cloned().unwrap_or_default();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    fn assign(
        &self,
        policy_id: Uuid,
        scope_type: ScopeType,
        scope_id: &str,
    ) -> Result<PolicyAssignment, PolicyError> {
        let mut state = self.lock()?;
        state.policy(policy_id)?;
        let assignment = PolicyAssignment {
            policy_id,
            scope_type,
            scope_id: scope_id.to_string(),
            created_at: Utc::now(),
        };
        state.assignments.push(assignment.clone());
        tracing::info!(%policy_id, %scope_type, scope_id, "assigned policy");
        Ok(assignment)
    }

    fn active_assignments_for_org(
        &self,
        org_id: Uuid,
    ) -> Result<Vec<ActiveAssignment>, PolicyError> {
        let state = self.lock()?;
        let scope_id = org_id.to_string();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for assignment in &state.assignments {
            if assignment.scope_type != ScopeType::Org || assignment.scope_id != scope_id {
                continue;
            }
            if !seen.insert(assignment.policy_id) {
                continue;
            }
            let Some(policy) = state.policies.get(&assignment.policy_id) else {
                continue;
            };
            let active = state
                .versions
                .get(&assignment.policy_id)
                .and_then(|vs| vs.iter().find(|v| v.status == VersionStatus::Active));
            if let Some(version) = active {
                out.push(ActiveAssignment {
                    policy: policy.clone(),
                    version: version.clone(),
                });
            }
        }
        // Stable sort: equal versions keep assignment order.
        out.sort_by(|a, b| b.version.version.cmp(&a.version.version));
        Ok(out)
    }

    fn record_approval(
        &self,
        policy_id: Uuid,
        version: u32,
        user_id: Uuid,
    ) -> Result<bool, PolicyError> {
        let mut state = self.lock()?;
        state.version(policy_id, version)?;
        if !state.approval_keys.insert((policy_id, version, user_id)) {
            return Ok(false);
        }
        state.approvals.push(PolicyApproval {
            policy_id,
            version,
            user_id,
            approved_at: Utc::now(),
        });
        Ok(true)
    }

    fn count_approvals(&self, policy_id: Uuid, version: u32) -> Result<usize, PolicyError> {
        let state = self.lock()?;
        Ok(state
            .approvals
            .iter()
            .filter(|a| a.policy_id == policy_id && a.version == version)
            .count())
    }

    fn approve_version(
        &self,
        policy_id: Uuid,
        version: u32,
        approved_by: Option<Uuid>,
    ) -> Result<PolicyVersion, PolicyError> {
        let mut state = self.lock()?;
        let target = state.version_mut(policy_id, version)?;
        if !target.status.can_transition_to(VersionStatus::Approved) {
            return Err(PolicyError::InvalidTransition {
                policy_id,
                version,
                from: target.status.to_string(),
                to: VersionStatus::Approved.to_string(),
            });
        }
        if target.status == VersionStatus::Draft {
            target.status = VersionStatus::Approved;
            target.approved_by = approved_by;
            target.approved_at = Some(Utc::now());
            tracing::info!(%policy_id, version, "approved policy version");
        }
        Ok(target.clone())
    }

    fn activate_version(&self, policy_id: Uuid, version: u32) -> Result<PolicyVersion, PolicyError> {
        let mut state = self.lock()?;
        let status = state.version(policy_id, version)?.status;
        if status != VersionStatus::Approved {
            return Err(PolicyError::NotApproved {
                version,
                status: status.to_string(),
            });
        }

        let now = Utc::now();
        let mut activated = None;
        if let Some(versions) = state.versions.get_mut(&policy_id) {
            for v in versions.iter_mut() {
                if v.version == version {
                    v.status = VersionStatus::Active;
                    v.activated_at = Some(now);
                    activated = Some(v.clone());
                } else {
                    v.status = VersionStatus::Draft;
                }
            }
        }
        tracing::info!(%policy_id, version, "activated policy version");
        activated.ok_or(PolicyError::VersionNotFound { policy_id, version })
    }

    fn put_rollout(&self, rollout: PolicyRollout) -> Result<(), PolicyError> {
        let mut state = self.lock()?;
        state.version(rollout.policy_id, rollout.version)?;
        tracing::info!(
            policy_id = %rollout.policy_id,
            version = rollout.version,
            percent = rollout.percent,
            "stored canary rollout"
        );
        state.rollouts.push(rollout);
        Ok(())
    }

    fn active_rollout(
        &self,
        org_id: Uuid,
        policy_id: Uuid,
    ) -> Result<Option<PolicyRollout>, PolicyError> {
        let state = self.lock()?;
        Ok(state
            .rollouts
            .iter()
            .rev()
            .find(|r| r.active && r.org_id == org_id && r.policy_id == policy_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn repo_with_policy() -> (MemoryPolicyRepository, Policy) {
        let repo = MemoryPolicyRepository::new();
        let policy = repo
            .create_policy(Uuid::new_v4(), "payments", "aurajson", None)
            .unwrap();
        (repo, policy)
    }

    #[test]
    fn versions_start_at_one_and_increase() {
        let (repo, p) = repo_with_policy();
        let v1 = repo.add_version(p.id, json!({"rules": []}), None).unwrap();
        let v2 = repo.add_version(p.id, json!({"rules": []}), None).unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(v2.status, VersionStatus::Draft);
        let listed: Vec<u32> = repo.list_versions(p.id).unwrap().iter().map(|v| v.version).collect();
        assert_eq!(listed, vec![2, 1]);
    }

    #[test]
    fn concurrent_add_version_never_duplicates() {
        let (repo, p) = repo_with_policy();
        let repo = Arc::new(repo);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = Arc::clone(&repo);
                std::thread::spawn(move || {
                    (0..10)
                        .map(|_| repo.add_version(p.id, json!({}), None).unwrap().version)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<u32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (1..=80).collect::<Vec<u32>>());
    }

    #[test]
    fn add_version_to_unknown_policy_is_not_found() {
        let repo = MemoryPolicyRepository::new();
        let err = repo.add_version(Uuid::new_v4(), json!({}), None).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn activating_draft_is_a_conflict() {
        let (repo, p) = repo_with_policy();
        repo.add_version(p.id, json!({}), None).unwrap();
        let err = repo.activate_version(p.id, 1).unwrap_err();
        assert!(err.is_conflict(), "got {:?}", err);
    }

    #[test]
    fn activating_missing_version_is_not_found() {
        let (repo, p) = repo_with_policy();
        let err = repo.activate_version(p.id, 7).unwrap_err();
        assert!(err.is_not_found(), "got {:?}", err);
    }

    #[test]
    fn activation_demotes_siblings() {
        let (repo, p) = repo_with_policy();
        for _ in 0..3 {
            repo.add_version(p.id, json!({}), None).unwrap();
        }
        repo.approve_version(p.id, 1, None).unwrap();
        repo.activate_version(p.id, 1).unwrap();
        repo.approve_version(p.id, 2, None).unwrap();
        repo.approve_version(p.id, 3, None).unwrap();

        let active = repo.activate_version(p.id, 3).unwrap();
        assert_eq!(active.status, VersionStatus::Active);
        assert!(active.activated_at.is_some());

        let statuses: Vec<(u32, VersionStatus)> = repo
            .list_versions(p.id)
            .unwrap()
            .iter()
            .map(|v| (v.version, v.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (3, VersionStatus::Active),
                (2, VersionStatus::Draft),
                (1, VersionStatus::Draft),
            ]
        );
    }

    #[test]
    fn approving_active_version_is_rejected() {
        let (repo, p) = repo_with_policy();
        repo.add_version(p.id, json!({}), None).unwrap();
        repo.approve_version(p.id, 1, None).unwrap();
        repo.activate_version(p.id, 1).unwrap();
        let err = repo.approve_version(p.id, 1, None).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidTransition { .. }));
    }

    #[test]
    fn reapproval_keeps_first_approver() {
        let (repo, p) = repo_with_policy();
        repo.add_version(p.id, json!({}), None).unwrap();
        let first = Uuid::new_v4();
        repo.approve_version(p.id, 1, Some(first)).unwrap();
        let again = repo.approve_version(p.id, 1, Some(Uuid::new_v4())).unwrap();
        assert_eq!(again.approved_by, Some(first));
    }

    #[test]
    fn duplicate_approval_counts_once() {
        let (repo, p) = repo_with_policy();
        repo.add_version(p.id, json!({}), None).unwrap();
        let alice = Uuid::new_v4();
        assert!(repo.record_approval(p.id, 1, alice).unwrap());
        assert!(!repo.record_approval(p.id, 1, alice).unwrap());
        assert_eq!(repo.count_approvals(p.id, 1).unwrap(), 1);
        repo.record_approval(p.id, 1, Uuid::new_v4()).unwrap();
        assert_eq!(repo.count_approvals(p.id, 1).unwrap(), 2);
    }

    #[test]
    fn active_assignments_only_for_org_scope_with_active_version() {
        let repo = MemoryPolicyRepository::new();
        let org = Uuid::new_v4();
        let a = repo.create_policy(org, "a", "aurajson", None).unwrap();
        let b = repo.create_policy(org, "b", "aurajson", None).unwrap();
        let c = repo.create_policy(org, "c", "aurajson", None).unwrap();

        // a: active v1
        repo.add_version(a.id, json!({}), None).unwrap();
        repo.approve_version(a.id, 1, None).unwrap();
        repo.activate_version(a.id, 1).unwrap();
        // b: active v2
        repo.add_version(b.id, json!({}), None).unwrap();
        repo.add_version(b.id, json!({}), None).unwrap();
        repo.approve_version(b.id, 2, None).unwrap();
        repo.activate_version(b.id, 2).unwrap();
        // c: draft only
        repo.add_version(c.id, json!({}), None).unwrap();

        repo.assign(a.id, ScopeType::Org, &org.to_string()).unwrap();
        repo.assign(a.id, ScopeType::Org, &org.to_string()).unwrap();
        repo.assign(b.id, ScopeType::Org, &org.to_string()).unwrap();
        repo.assign(c.id, ScopeType::Org, &org.to_string()).unwrap();
        repo.assign(b.id, ScopeType::Team, "devs").unwrap();

        let active = repo.active_assignments_for_org(org).unwrap();
        let ids: Vec<(Uuid, u32)> = active.iter().map(|a| (a.policy.id, a.version.version)).collect();
        assert_eq!(ids, vec![(b.id, 2), (a.id, 1)]);

        assert!(repo.active_assignments_for_org(Uuid::new_v4()).unwrap().is_empty());
    }

    #[test]
    fn latest_active_rollout_wins() {
        let (repo, p) = repo_with_policy();
        repo.add_version(p.id, json!({}), None).unwrap();
        repo.add_version(p.id, json!({}), None).unwrap();
        let org = p.org_id;
        let rollout = |version, percent, active| PolicyRollout {
            org_id: org,
            policy_id: p.id,
            version,
            percent,
            active,
            created_at: Utc::now(),
        };
        assert!(repo.active_rollout(org, p.id).unwrap().is_none());
        repo.put_rollout(rollout(1, 10, true)).unwrap();
        repo.put_rollout(rollout(2, 25, true)).unwrap();
        repo.put_rollout(rollout(1, 90, false)).unwrap();
        let found = repo.active_rollout(org, p.id).unwrap().unwrap();
        assert_eq!((found.version, found.percent), (2, 25));
    }
}

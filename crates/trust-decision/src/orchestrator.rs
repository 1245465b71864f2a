// orchestrator.rs - The decision path: one verify request in, one decision out.
//
// Steps, in order (any failure is a deny with an explanatory reason):
//
//   1. admission        in-flight limit (optional)
//   2. assignment       active (policy, version) pairs for the org; pick one
//                       by stable bucket when there are several
//   3. federation       cross-org requests need an active contract whose
//                       scope covers the action and resource
//   4. relationship     with a resource: agent can_act_for the (target) org
//   5. canary           swap in the rollout version for bucketed requests
//   6. context          merge risk signals and the federation block
//   7. evaluation       compiled cache, then the engine's evaluator
//   8. enrichment       trace gets policy id/version and the principal
//   9. telemetry        metrics now; trace, audit, reputation in background
//  10. trust token      only on request, bounded by the signer timeout
//
// `decide` never returns an error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use trust_audit::{AuditAction, AuditRecord, AuditSink};
use trust_graph::{GraphClient, RelationRef};
use trust_policy::canonical::to_canonical_bytes;
use trust_policy::{
    CompiledCache, Decision, EvaluatorRegistry, Policy, PolicyRepository, PrincipalTrace, Trace,
};
use uuid::Uuid;

use crate::background::BackgroundPool;
use crate::bucket::{canary_bucket, select_index, selection_key};
use crate::config::EngineConfig;
use crate::context::{canonicalize, inject_federation, merge_signals};
use crate::federation::{
    FederationScope, FederationStore, MemoryFederationStore, AUTHN_ATTEST,
    REASON_ACTION_OUT_OF_SCOPE, REASON_ATTESTATION_REQUIRED, REASON_NO_CONTRACT,
    REASON_RESOURCE_OUT_OF_SCOPE,
};
use crate::metrics::DecisionMetrics;
use crate::risk::{RiskSignals, RiskTracker, FLAG_RATE_SPIKE};
use crate::sinks::{ReputationSink, TraceRecord, TraceSink};
use crate::token::{self, Signer, TokenSubject, TrustClaims};

pub const REASON_NO_ASSIGNMENT: &str = "No active policy assignment";
pub const REASON_NO_DELEGATION: &str = "No delegation to act for org";
pub const REASON_UNSUPPORTED_ENGINE: &str = "Unsupported engine";
pub const REASON_OVERLOADED: &str = "Verify overloaded";

/// Relation the agent must hold on the org before a resource is touched.
pub const RELATION_CAN_ACT_FOR: &str = "can_act_for";

/// Caller identity as established by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spiffe_id: Option<String>,
    /// apikey | spiffe | oidc | attest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authn_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub org_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub request_context: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_org_id: Option<Uuid>,
    #[serde(default)]
    pub include_trust_token: bool,
    #[serde(default)]
    pub principal: Principal,
}

impl VerifyRequest {
    pub fn new(org_id: Uuid, action: impl Into<String>) -> Self {
        Self {
            org_id,
            agent_id: None,
            action: action.into(),
            resource: String::new(),
            request_context: Value::Null,
            target_org_id: None,
            include_trust_token: false,
            principal: Principal::default(),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.request_context = context;
        self
    }

    pub fn with_target_org(mut self, target_org_id: Uuid) -> Self {
        self.target_org_id = Some(target_org_id);
        self
    }

    pub fn with_trust_token(mut self) -> Self {
        self.include_trust_token = true;
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = principal;
        self
    }

    fn agent(&self) -> &str {
        self.agent_id.as_deref().unwrap_or("")
    }

    /// The counterparty org when the request crosses an org boundary.
    fn cross_org_target(&self) -> Option<Uuid> {
        self.target_org_id.filter(|t| *t != self.org_id)
    }
}

/// The decision as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub allow: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub require_approval: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Enriched trace, kept in-process for callers that want to render it.
    #[serde(skip)]
    pub trace: Option<Trace>,
}

impl From<Decision> for VerifyResponse {
    fn from(d: Decision) -> Self {
        Self {
            allow: d.allow,
            reason: d.reason,
            trace_id: d.trace_id,
            require_approval: d.require_approval,
            hints: d.hints,
            token: None,
            trace: d.trace,
        }
    }
}

/// Output of the synchronous part of the decision path.
struct Evaluated {
    decision: Decision,
    policy: Policy,
    version: u32,
    signals: RiskSignals,
    canonical_context: Value,
}

pub struct DecisionEngine {
    config: EngineConfig,
    repo: Arc<dyn PolicyRepository>,
    registry: Arc<EvaluatorRegistry>,
    cache: Arc<CompiledCache>,
    graph: Arc<dyn GraphClient>,
    federation: Arc<dyn FederationStore>,
    signer: Option<Arc<dyn Signer>>,
    audit: Option<Arc<dyn AuditSink>>,
    traces: Option<Arc<dyn TraceSink>>,
    reputation: Option<Arc<dyn ReputationSink>>,
    risk: Arc<RiskTracker>,
    metrics: Arc<DecisionMetrics>,
    background: BackgroundPool,
    inflight: Option<Semaphore>,
}

impl DecisionEngine {
    /// Build an engine with the built-in evaluators, an empty compiled
    /// cache and no federation contracts. Must be called inside a tokio
    /// runtime (the background pool spawns its workers here).
    pub fn new(
        config: EngineConfig,
        repo: Arc<dyn PolicyRepository>,
        graph: Arc<dyn GraphClient>,
    ) -> Self {
        let metrics = Arc::new(DecisionMetrics::new());
        let background = BackgroundPool::new(
            config.background_workers,
            config.background_queue,
            Arc::clone(&metrics),
        );
        let inflight = (config.max_inflight > 0).then(|| Semaphore::new(config.max_inflight));
        Self {
            risk: Arc::new(RiskTracker::new(config.risk_window(), config.risk_spike_threshold)),
            repo,
            registry: Arc::new(EvaluatorRegistry::with_builtin()),
            cache: Arc::new(CompiledCache::new()),
            graph,
            federation: Arc::new(MemoryFederationStore::new()),
            signer: None,
            audit: None,
            traces: None,
            reputation: None,
            metrics,
            background,
            inflight,
            config,
        }
    }

    pub fn with_registry(mut self, registry: Arc<EvaluatorRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Share a compiled cache with the lifecycle service.
    pub fn with_cache(mut self, cache: Arc<CompiledCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_federation(mut self, federation: Arc<dyn FederationStore>) -> Self {
        self.federation = federation;
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_trace_sink(mut self, traces: Arc<dyn TraceSink>) -> Self {
        self.traces = Some(traces);
        self
    }

    pub fn with_reputation(mut self, reputation: Arc<dyn ReputationSink>) -> Self {
        self.reputation = Some(reputation);
        self
    }

    pub fn with_risk_tracker(mut self, risk: Arc<RiskTracker>) -> Self {
        self.risk = risk;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<DecisionMetrics> {
        &self.metrics
    }

    pub fn risk(&self) -> &Arc<RiskTracker> {
        &self.risk
    }

    pub fn cache(&self) -> &Arc<CompiledCache> {
        &self.cache
    }

    /// Drain queued background work. Later submissions are dropped.
    pub async fn shutdown(&self) {
        self.background.shutdown().await;
    }

    /// Decide one request. Always returns; every failure is a deny.
    pub async fn decide(&self, req: VerifyRequest) -> VerifyResponse {
        let org = req.org_id.to_string();

        let _permit = match &self.inflight {
            Some(limit) => match limit.try_acquire() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.metrics.record_quick_reject();
                    tracing::warn!(org_id = %org, "verify rejected: too many in flight");
                    return VerifyResponse::from(Decision::deny(REASON_OVERLOADED));
                }
            },
            None => None,
        };

        self.risk.record(&org, req.agent());

        let evaluated = match self.evaluate(&req) {
            Ok(evaluated) => evaluated,
            Err(deny) => {
                self.metrics.record_decision(&org, false, &deny.reason);
                tracing::info!(org_id = %org, agent_id = req.agent(), action = %req.action, reason = %deny.reason, "decision denied before evaluation");
                return VerifyResponse::from(deny);
            }
        };
        let Evaluated {
            mut decision,
            policy,
            version,
            signals,
            canonical_context,
        } = evaluated;

        if let Some(trace) = decision.trace.as_mut() {
            trace.policy_id = policy.id;
            trace.policy_version = version;
            trace.principal = Some(PrincipalTrace {
                org_id: org.clone(),
                agent_id: req.agent().to_string(),
                spiffe_id: req.principal.spiffe_id.clone(),
                authn_kind: req.principal.authn_kind.clone(),
                cert_fingerprint: req.principal.cert_fingerprint.clone(),
            });
        }

        self.metrics.record_decision(&org, decision.allow, &decision.reason);
        tracing::info!(
            org_id = %org,
            agent_id = req.agent(),
            action = %req.action,
            policy_id = %policy.id,
            version,
            allow = decision.allow,
            reason = %decision.reason,
            trace_id = %decision.trace_id,
            "decision"
        );

        if !decision.allow && signals.has_flag(FLAG_RATE_SPIKE) {
            self.update_reputation_later(req.org_id, req.agent());
        }
        self.persist_trace_later(&req, &policy, version, &decision);

        let mut response = VerifyResponse::from(decision);
        if req.include_trust_token {
            response.token = self
                .mint_token(&req, &policy, version, &response, &canonical_context)
                .await;
        }
        response
    }

    /// Everything up to and including evaluation. `Err` carries an early
    /// deny.
    fn evaluate(&self, req: &VerifyRequest) -> Result<Evaluated, Decision> {
        let org = req.org_id.to_string();
        let agent = req.agent();

        let assignments = match self.repo.active_assignments_for_org(req.org_id) {
            Ok(a) if !a.is_empty() => a,
            Ok(_) => return Err(Decision::deny(REASON_NO_ASSIGNMENT)),
            Err(e) => {
                tracing::warn!(org_id = %org, error = %e, "assignment lookup failed");
                return Err(Decision::deny(REASON_NO_ASSIGNMENT));
            }
        };
        let key = selection_key(&org, agent, &req.action, &req.resource);
        let index = select_index(&key, assignments.len());
        let Some(selected) = assignments.into_iter().nth(index) else {
            return Err(Decision::deny(REASON_NO_ASSIGNMENT));
        };
        let policy = selected.policy;
        let mut version = selected.version;

        let federation = match req.cross_org_target() {
            Some(target) => Some((target, self.check_federation(req, target)?)),
            None => None,
        };

        if !req.resource.is_empty() {
            let acting_for = req.cross_org_target().unwrap_or(req.org_id);
            self.check_delegation(agent, acting_for)?;
        }

        match self.repo.active_rollout(req.org_id, policy.id) {
            Ok(Some(rollout)) if rollout.percent > 0 => {
                let bucket = canary_bucket(&org, agent, &policy.id.to_string());
                if bucket < u32::from(rollout.percent) {
                    match self.repo.get_version(policy.id, rollout.version) {
                        Ok(canary) => {
                            tracing::debug!(policy_id = %policy.id, version = canary.version, bucket, "canary version selected");
                            version = canary;
                        }
                        Err(e) => {
                            tracing::warn!(policy_id = %policy.id, version = rollout.version, error = %e, "canary version missing")
                        }
                    }
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(policy_id = %policy.id, error = %e, "rollout lookup failed"),
        }

        let signals = self.risk.signals(&org, agent);
        let mut context = merge_signals(req.request_context.clone(), &signals);
        if let Some((target, scope)) = &federation {
            context = inject_federation(context, *target, scope);
        }

        let evaluator = match self.registry.get(&policy.engine_type) {
            Ok(e) => e,
            Err(_) => {
                tracing::warn!(policy_id = %policy.id, engine = %policy.engine_type, "no evaluator for engine");
                return Err(Decision::deny(REASON_UNSUPPORTED_ENGINE));
            }
        };
        let compiled = match self.cache.get(policy.id, version.version) {
            Some(compiled) => compiled,
            None => {
                let compiled = evaluator.compile(&version.body).map_err(|e| {
                    tracing::warn!(policy_id = %policy.id, version = version.version, error = %e, "compile failed");
                    Decision::deny(e.to_string())
                })?;
                self.cache.put(policy.id, version.version, compiled.clone());
                compiled
            }
        };

        let canonical_context = canonicalize(&context);
        let decision = evaluator
            .evaluate(&compiled, &canonical_context)
            .map_err(|e| Decision::deny(e.to_string()))?;

        Ok(Evaluated {
            decision,
            policy,
            version: version.version,
            signals,
            canonical_context,
        })
    }

    /// Contract and scope checks for a cross-org request. Returns the
    /// contract scope to inject into the context.
    fn check_federation(
        &self,
        req: &VerifyRequest,
        target: Uuid,
    ) -> Result<FederationScope, Decision> {
        let contract = match self.federation.active_contract(req.org_id, target) {
            Ok(Some(c)) => c,
            Ok(None) => return Err(self.deny_no_contract(req, target)),
            Err(e) => {
                tracing::warn!(org_id = %req.org_id, to_org_id = %target, error = %e, "federation lookup failed");
                return Err(self.deny_no_contract(req, target));
            }
        };

        let scope = contract.scope;
        if !scope.permits_action(&req.action) {
            self.audit_later(AuditRecord::new(
                req.org_id,
                AuditAction::FederationScopeDenied,
                json!({"to_org_id": target, "reason": "action_not_allowed", "action": req.action}),
            ));
            return Err(Decision::deny(REASON_ACTION_OUT_OF_SCOPE));
        }
        if !scope.permits_resource(&req.resource) {
            self.audit_later(AuditRecord::new(
                req.org_id,
                AuditAction::FederationScopeDenied,
                json!({"to_org_id": target, "reason": "resource_not_allowed", "resource": req.resource}),
            ));
            return Err(Decision::deny(REASON_RESOURCE_OUT_OF_SCOPE));
        }
        self.audit_later(AuditRecord::new(
            req.org_id,
            AuditAction::FederationBoundaryCrossing,
            json!({"to_org_id": target, "allowed": true}),
        ));

        if self.config.zero_trust_cross_org
            && req.principal.authn_kind.as_deref() != Some(AUTHN_ATTEST)
        {
            return Err(Decision::deny(REASON_ATTESTATION_REQUIRED));
        }
        Ok(scope)
    }

    fn deny_no_contract(&self, req: &VerifyRequest, target: Uuid) -> Decision {
        self.audit_later(AuditRecord::new(
            req.org_id,
            AuditAction::FederationBoundaryCrossing,
            json!({"to_org_id": target, "allowed": false, "reason": "no_contract"}),
        ));
        Decision::deny(REASON_NO_CONTRACT)
    }

    /// Relationship gate: agent can_act_for org. Graph errors deny.
    fn check_delegation(&self, agent: &str, org_id: Uuid) -> Result<(), Decision> {
        let subject = RelationRef::new("agent", agent);
        let object = RelationRef::new("org", org_id.to_string());
        match self.graph.check(&subject, RELATION_CAN_ACT_FOR, &object) {
            Ok(result) if result.allowed => Ok(()),
            Ok(_) => Err(Decision::deny(REASON_NO_DELEGATION)),
            Err(e) => {
                tracing::warn!(%subject, %object, error = %e, "relationship check failed");
                Err(Decision::deny(REASON_NO_DELEGATION))
            }
        }
    }

    async fn mint_token(
        &self,
        req: &VerifyRequest,
        policy: &Policy,
        version: u32,
        response: &VerifyResponse,
        canonical_context: &Value,
    ) -> Option<String> {
        let Some(signer) = &self.signer else {
            self.metrics.record_token(false);
            tracing::warn!(org_id = %req.org_id, "trust token requested but no signer configured");
            return None;
        };
        let org = req.org_id.to_string();
        let policy_id = policy.id.to_string();
        let subject = TokenSubject {
            org_id: &org,
            agent_id: req.agent(),
            policy_id: &policy_id,
            policy_version: version,
            allow: response.allow,
            reason: &response.reason,
            trace_id: &response.trace_id,
        };
        let claims = TrustClaims::issue(
            &subject,
            &to_canonical_bytes(canonical_context),
            std::time::Duration::from_secs(self.config.trust_token_ttl_secs),
        );
        match token::mint(signer.as_ref(), &claims, self.config.signer_timeout()).await {
            Ok(token) => {
                self.metrics.record_token(true);
                Some(token)
            }
            Err(e) => {
                self.metrics.record_token(false);
                tracing::warn!(org_id = %org, error = %e, "trust token minting failed");
                None
            }
        }
    }

    fn audit_later(&self, record: AuditRecord) {
        let Some(audit) = self.audit.clone() else {
            return;
        };
        self.background.submit(
            "audit",
            Box::new(move || {
                let action = record.action;
                if let Err(e) = audit.record(record) {
                    tracing::warn!(%action, error = %e, "audit append failed");
                }
            }),
        );
    }

    fn update_reputation_later(&self, org_id: Uuid, agent_id: &str) {
        let Some(reputation) = self.reputation.clone() else {
            return;
        };
        if agent_id.is_empty() {
            return;
        }
        let agent_id = agent_id.to_string();
        self.background.submit(
            "reputation",
            Box::new(move || match reputation.record_violation(org_id, &agent_id) {
                Ok(rep) => {
                    tracing::info!(%org_id, agent_id = %agent_id, violations = rep.violations, reliability = rep.reliability, "agent reputation lowered")
                }
                Err(e) => tracing::warn!(%org_id, agent_id = %agent_id, error = %e, "reputation update failed"),
            }),
        );
    }

    fn persist_trace_later(
        &self,
        req: &VerifyRequest,
        policy: &Policy,
        version: u32,
        decision: &Decision,
    ) {
        let Some(trace) = decision.trace.clone() else {
            return;
        };
        if self.traces.is_none() && self.audit.is_none() {
            return;
        }
        let record = TraceRecord {
            trace_id: decision.trace_id.clone(),
            org_id: req.org_id,
            agent_id: req.agent().to_string(),
            allow: decision.allow,
            reason: decision.reason.clone(),
            trace,
        };
        let mut audit_record = AuditRecord::new(
            req.org_id,
            AuditAction::DecisionTraceRecorded,
            json!({
                "trace_id": decision.trace_id,
                "policy_id": policy.id,
                "version": version,
                "allow": decision.allow,
                "reason": decision.reason,
            }),
        );
        if !req.agent().is_empty() {
            audit_record = audit_record.with_actor_agent(req.agent());
        }
        let traces = self.traces.clone();
        let audit = self.audit.clone();
        self.background.submit(
            "trace",
            Box::new(move || {
                let trace_id = record.trace_id.clone();
                if let Some(traces) = traces {
                    if let Err(e) = traces.persist(record) {
                        tracing::warn!(trace_id = %trace_id, error = %e, "trace persist failed");
                    }
                }
                if let Some(audit) = audit {
                    if let Err(e) = audit.record(audit_record) {
                        tracing::warn!(trace_id = %trace_id, error = %e, "trace audit append failed");
                    }
                }
            }),
        );
    }
}

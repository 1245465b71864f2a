// verify.rs - Run a fixture's requests through the full decision path.
//
// The graph is a LocalGraph behind the TTL cache, the same composition a
// long-running service would use. Each decision is printed as one JSON line.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use trust_audit::{AuditSink, SharedLedger};
use trust_decision::{
    DecisionEngine, EngineConfig, LocalEd25519Signer, MemoryFederationStore, PolicyLifecycle,
};
use trust_graph::{CachedGraph, LocalGraph, MemoryTupleStore};
use trust_policy::{CompiledCache, EvaluatorRegistry, MemoryPolicyRepository};

use crate::fixture::Fixture;

pub async fn execute(
    config: EngineConfig,
    fixture_path: &Path,
    ledger: Option<&Path>,
    signing_key: Option<&Path>,
    kid: &str,
) -> anyhow::Result<()> {
    let fixture = Fixture::load(fixture_path)?;

    let repo = Arc::new(MemoryPolicyRepository::new());
    let registry = Arc::new(EvaluatorRegistry::with_builtin());
    let cache = Arc::new(CompiledCache::new());
    let local = Arc::new(LocalGraph::new(Arc::new(MemoryTupleStore::new())));
    let graph = Arc::new(CachedGraph::new(
        local,
        config.graph_cache_ttl(),
        config.graph_cache_neg_ttl(),
    ));
    let federation = Arc::new(MemoryFederationStore::new());

    let audit: Option<Arc<dyn AuditSink>> = match ledger {
        Some(path) => Some(Arc::new(
            SharedLedger::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => None,
    };

    let mut lifecycle = PolicyLifecycle::new(
        repo.clone(),
        Arc::clone(&registry),
        Arc::clone(&cache),
        config.approvals_required,
    );
    if let Some(audit) = &audit {
        lifecycle = lifecycle.with_audit(Arc::clone(audit));
    }
    let requests = fixture.install(
        &lifecycle,
        graph.as_ref(),
        &federation,
        config.approvals_required,
    )?;

    let mut engine = DecisionEngine::new(config, repo, graph)
        .with_registry(registry)
        .with_cache(cache)
        .with_federation(federation);
    if let Some(audit) = audit {
        engine = engine.with_audit(audit);
    }
    if let Some(path) = signing_key {
        let pkcs8 = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        engine = engine.with_signer(Arc::new(LocalEd25519Signer::from_pkcs8(kid, &pkcs8)?));
    }

    for request in requests {
        let response = engine.decide(request).await;
        println!("{}", serde_json::to_string(&response)?);
    }

    engine.shutdown().await;
    let snapshot = engine.metrics().snapshot();
    tracing::info!(metrics = %serde_json::to_string(&snapshot)?, "verify finished");
    Ok(())
}

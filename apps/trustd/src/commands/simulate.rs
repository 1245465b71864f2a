// simulate.rs - Evaluate a policy body against one input, no lifecycle.

use std::path::Path;

use anyhow::Context;
use trust_decision::context::canonicalize;
use trust_policy::EvaluatorRegistry;

use super::read_json;

pub fn execute(policy: &Path, input: &Path, engine: &str) -> anyhow::Result<()> {
    let body = read_json(policy)?;
    let input = read_json(input)?;

    let registry = EvaluatorRegistry::with_builtin();
    let evaluator = registry.get(engine)?;
    let compiled = evaluator
        .compile(&body)
        .with_context(|| format!("compiling {}", policy.display()))?;
    let decision = evaluator.evaluate(&compiled, &canonicalize(&input))?;

    tracing::info!(allow = decision.allow, reason = %decision.reason, "simulated");
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

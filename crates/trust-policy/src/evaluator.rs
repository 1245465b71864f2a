// evaluator.rs - Pluggable evaluator contract and registry.
//
// Each engine type ("aurajson", "rego", ...) has one Evaluator. Compilation is
// separated from evaluation so the compiled artifact can be cached per
// (policy, version) and reused across requests.
//
// The registry is an explicit object built once at startup and handed to the
// orchestrator, not a process-global map.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::decision::Decision;
use crate::error::PolicyError;

/// Opaque, engine-specific compiled artifact.
///
/// Shared behind an `Arc` so cache hits are cheap clones. Evaluators downcast
/// to their own concrete type.
pub type CompiledPolicy = Arc<dyn Any + Send + Sync>;

/// A policy engine: compiles bodies and evaluates requests against them.
pub trait Evaluator: Send + Sync {
    /// The engine type string this evaluator is registered under.
    fn name(&self) -> &str;

    /// Parse and validate a policy body into a reusable artifact.
    fn compile(&self, body: &Value) -> Result<CompiledPolicy, PolicyError>;

    /// Evaluate an input document against a compiled artifact.
    fn evaluate(&self, compiled: &CompiledPolicy, input: &Value) -> Result<Decision, PolicyError>;
}

impl std::fmt::Debug for dyn Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator").field("name", &self.name()).finish()
    }
}

/// Lookup table from engine type to evaluator.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    evaluators: HashMap<String, Arc<dyn Evaluator>>,
}

impl EvaluatorRegistry {
    /// An empty registry. Every lookup fails until evaluators are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in AuraJSON evaluator.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::aurajson::AuraJsonEvaluator::new()));
        registry
    }

    /// Register an evaluator under its own name, replacing any previous one.
    pub fn register(&mut self, evaluator: Arc<dyn Evaluator>) {
        tracing::debug!(engine = evaluator.name(), "registered policy evaluator");
        self.evaluators
            .insert(evaluator.name().to_string(), evaluator);
    }

    /// Look up the evaluator for an engine type.
    pub fn get(&self, engine_type: &str) -> Result<Arc<dyn Evaluator>, PolicyError> {
        self.evaluators
            .get(engine_type)
            .cloned()
            .ok_or_else(|| PolicyError::UnsupportedEngine(engine_type.to_string()))
    }

    /// Registered engine names, sorted.
    pub fn engines(&self) -> Vec<String> {
        let mut names: Vec<String> = self.evaluators.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorRegistry")
            .field("engines", &self.engines())
            .finish()
    }
}

// aurajson - The built-in rule DSL.
//
// Policy body:
//
//   { "schema"?:     { "required": [..], "properties": {..} },
//     "rules":       [ { "id", "effect": "allow"|"deny", "when": <expr> }, .. ],
//     "precedence"?: { "deny_overrides": bool } }      // default true
//
// Evaluation:
// 1. If a schema is present and the input violates it → deny,
//    "Schema validation failed", violations in the trace, no rules run.
// 2. Rules run in declared order.
//    - matching deny: allow=false; stop if deny_overrides
//    - matching allow: allow=true; keep going so a later deny can still win
// 3. Nothing matched → deny, "No matching allow rule".
//
// With deny_overrides=false the last matching rule decides.

mod ast;
mod path;
mod schema;

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

pub use ast::{Condition, Expr, Op};
pub use path::FieldPath;
pub use schema::InputSchema;

use crate::canonical;
use crate::decision::{Decision, RuleTrace, Trace};
use crate::error::PolicyError;
use crate::evaluator::{CompiledPolicy, Evaluator};
use crate::model::ENGINE_AURA_JSON;

pub const REASON_ALLOW: &str = "Matched allow rule";
pub const REASON_DENY: &str = "Matched deny rule";
pub const REASON_NO_MATCH: &str = "No matching allow rule";
pub const REASON_SCHEMA: &str = "Schema validation failed";

/// Effect of a matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

/// A compiled rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: String,
    pub effect: Effect,
    pub when: Expr,
}

/// The compiled form of an AuraJSON body.
#[derive(Debug, Clone)]
pub struct CompiledAuraJson {
    pub rules: Vec<Rule>,
    pub deny_overrides: bool,
    pub schema: Option<InputSchema>,
    /// Original body, kept for trace-id hashing.
    body: Value,
}

impl CompiledAuraJson {
    /// Parse a policy body.
    pub fn parse(body: &Value) -> Result<Self, PolicyError> {
        let map = body
            .as_object()
            .ok_or_else(|| PolicyError::InvalidBody("policy body must be a JSON object".into()))?;

        let schema = InputSchema::parse(map.get("schema"))?;

        let rules = match map.get("rules") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, r)| parse_rule(i, r))
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(PolicyError::InvalidBody("'rules' must be an array".into())),
        };

        let deny_overrides = match map.get("precedence") {
            None | Some(Value::Null) => true,
            Some(Value::Object(p)) => match p.get("deny_overrides") {
                None | Some(Value::Null) => true,
                Some(Value::Bool(b)) => *b,
                Some(_) => {
                    return Err(PolicyError::InvalidBody(
                        "'precedence.deny_overrides' must be a boolean".into(),
                    ))
                }
            },
            Some(_) => {
                return Err(PolicyError::InvalidBody("'precedence' must be an object".into()))
            }
        };

        Ok(Self {
            rules,
            deny_overrides,
            schema,
            body: body.clone(),
        })
    }

    /// Run the rules against an input document.
    pub fn evaluate(&self, input: &Value) -> Decision {
        let start = Instant::now();
        let mut trace = Trace::begin(ENGINE_AURA_JSON, input.clone());
        let trace_id = canonical::trace_id(input, &self.body);

        if let Some(schema) = &self.schema {
            let violations = schema.validate(input);
            if !violations.is_empty() {
                trace.validations = violations;
                trace.duration_ms = elapsed_ms(start);
                return Decision {
                    allow: false,
                    reason: REASON_SCHEMA.to_string(),
                    trace_id,
                    trace: Some(trace),
                    require_approval: false,
                    hints: Vec::new(),
                };
            }
        }

        let mut allow = false;
        let mut reason = REASON_NO_MATCH;
        for rule in &self.rules {
            let matched = rule.when.matches(input);
            trace.evaluated_rules.push(RuleTrace {
                rule_id: rule.id.clone(),
                matched,
                effect: rule.effect.as_str().to_string(),
                reason: None,
            });
            if !matched {
                continue;
            }
            match rule.effect {
                Effect::Deny => {
                    allow = false;
                    reason = REASON_DENY;
                    if self.deny_overrides {
                        break;
                    }
                }
                Effect::Allow => {
                    allow = true;
                    reason = REASON_ALLOW;
                }
            }
        }

        trace.duration_ms = elapsed_ms(start);
        Decision {
            allow,
            reason: reason.to_string(),
            trace_id,
            trace: Some(trace),
            require_approval: false,
            hints: Vec::new(),
        }
    }
}

fn parse_rule(index: usize, raw: &Value) -> Result<Rule, PolicyError> {
    let map = raw
        .as_object()
        .ok_or_else(|| PolicyError::InvalidBody(format!("rule #{} must be an object", index)))?;

    let id = match map.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => format!("rule-{}", index),
    };
    let effect = match map
        .get("effect")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("allow") => Effect::Allow,
        Some("deny") => Effect::Deny,
        other => {
            return Err(PolicyError::InvalidBody(format!(
                "rule '{}' has invalid effect {:?}",
                id, other
            )))
        }
    };
    let when = Expr::parse_when(map.get("when"))?;
    Ok(Rule { id, effect, when })
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Evaluator for the "aurajson" engine type.
#[derive(Debug, Default)]
pub struct AuraJsonEvaluator;

impl AuraJsonEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for AuraJsonEvaluator {
    fn name(&self) -> &str {
        ENGINE_AURA_JSON
    }

    fn compile(&self, body: &Value) -> Result<CompiledPolicy, PolicyError> {
        let compiled = CompiledAuraJson::parse(body)?;
        tracing::debug!(rules = compiled.rules.len(), "compiled aurajson policy");
        Ok(Arc::new(compiled))
    }

    fn evaluate(&self, compiled: &CompiledPolicy, input: &Value) -> Result<Decision, PolicyError> {
        let compiled = compiled
            .downcast_ref::<CompiledAuraJson>()
            .ok_or_else(|| PolicyError::BadCompiledPolicy(ENGINE_AURA_JSON.to_string()))?;
        Ok(compiled.evaluate(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(body: Value, input: Value) -> Decision {
        let evaluator = AuraJsonEvaluator::new();
        let compiled = evaluator.compile(&body).unwrap();
        evaluator.evaluate(&compiled, &input).unwrap()
    }

    fn read_only() -> Value {
        json!({"rules": [{"id": "r1", "effect": "allow", "when": {"action": {"eq": "read"}}}]})
    }

    #[test]
    fn allow_only_match() {
        let d = run(read_only(), json!({"action": "read"}));
        assert!(d.allow);
        assert_eq!(d.reason, REASON_ALLOW);
        let trace = d.trace.unwrap();
        assert_eq!(trace.engine, "aurajson");
        assert_eq!(trace.evaluated_rules.len(), 1);
        assert!(trace.evaluated_rules[0].matched);
    }

    #[test]
    fn no_match_denies() {
        let d = run(read_only(), json!({"action": "write"}));
        assert!(!d.allow);
        assert_eq!(d.reason, REASON_NO_MATCH);
    }

    #[test]
    fn deny_overrides_earlier_allow() {
        let body = json!({
            "rules": [
                {"id": "base", "effect": "allow", "when": {}},
                {"id": "risky", "effect": "deny", "when": {"risk.score": {"gte": 70}}}
            ],
            "precedence": {"deny_overrides": true}
        });
        let d = run(body, json!({"risk": {"score": 80}}));
        assert!(!d.allow);
        assert_eq!(d.reason, REASON_DENY);
    }

    #[test]
    fn deny_overrides_stops_at_first_deny() {
        let body = json!({
            "rules": [
                {"id": "d", "effect": "deny", "when": {}},
                {"id": "a", "effect": "allow", "when": {}}
            ]
        });
        let d = run(body, json!({}));
        assert!(!d.allow);
        assert_eq!(d.trace.unwrap().evaluated_rules.len(), 1);
    }

    #[test]
    fn without_deny_overrides_last_match_wins() {
        let body = json!({
            "rules": [
                {"id": "d", "effect": "deny", "when": {}},
                {"id": "a", "effect": "allow", "when": {}}
            ],
            "precedence": {"deny_overrides": false}
        });
        let d = run(body, json!({}));
        assert!(d.allow);
        assert_eq!(d.reason, REASON_ALLOW);
        assert_eq!(d.trace.unwrap().evaluated_rules.len(), 2);
    }

    #[test]
    fn schema_failure_skips_rules() {
        let body = json!({
            "schema": {"required": ["action"], "properties": {"amount": {"type": "number"}}},
            "rules": [{"id": "any", "effect": "allow"}]
        });
        let d = run(body, json!({"amount": "ten"}));
        assert!(!d.allow);
        assert_eq!(d.reason, REASON_SCHEMA);
        let trace = d.trace.unwrap();
        assert!(trace.evaluated_rules.is_empty());
        assert_eq!(trace.validations.len(), 2);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let body = read_only();
        let input = json!({"action": "read", "ctx": {"b": 1, "a": 2}});
        let first = run(body.clone(), input.clone());
        for _ in 0..5 {
            let again = run(body.clone(), input.clone());
            assert_eq!(again.allow, first.allow);
            assert_eq!(again.reason, first.reason);
            assert_eq!(again.trace_id, first.trace_id);
        }
        assert_eq!(first.trace_id.len(), 16);
    }

    #[test]
    fn missing_rule_id_gets_positional_name() {
        let d = run(json!({"rules": [{"effect": "deny"}]}), json!({}));
        assert_eq!(d.trace.unwrap().evaluated_rules[0].rule_id, "rule-0");
    }

    #[test]
    fn compile_rejects_malformed_bodies() {
        let evaluator = AuraJsonEvaluator::new();
        for bad in [
            json!([]),
            json!({"rules": {}}),
            json!({"rules": [{"effect": "maybe"}]}),
            json!({"rules": [{"effect": "allow", "when": {"x": {"like": 1}}}]}),
            json!({"precedence": {"deny_overrides": "yes"}}),
            json!({"schema": []}),
        ] {
            assert!(
                matches!(evaluator.compile(&bad), Err(PolicyError::InvalidBody(_))),
                "expected InvalidBody for {}",
                bad
            );
        }
    }

    #[test]
    fn foreign_compiled_artifact_is_rejected() {
        let evaluator = AuraJsonEvaluator::new();
        let foreign: CompiledPolicy = Arc::new(42u32);
        assert!(matches!(
            evaluator.evaluate(&foreign, &json!({})),
            Err(PolicyError::BadCompiledPolicy(_))
        ));
    }
}

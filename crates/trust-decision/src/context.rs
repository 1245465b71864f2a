// context.rs - Builds the evaluation input from the caller's request context.
//
// The caller's JSON is taken as the base document. Engine-derived signals are
// written under reserved top-level keys, overwriting anything the caller put
// there:
//
//   risk:       { score, flags }
//   federation: { counterparty_org_id, scope: { allowed_actions, allowed_resources } }
//
// A non-object request context is preserved under "_".

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::federation::FederationScope;
use crate::risk::RiskSignals;

/// Base object for a request context.
fn as_object(input: Value) -> Map<String, Value> {
    match input {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("_".to_string(), other);
            map
        }
    }
}

/// Merge risk signals into the request context.
pub fn merge_signals(input: Value, signals: &RiskSignals) -> Value {
    let mut map = as_object(input);
    map.insert(
        "risk".to_string(),
        json!({"score": signals.score, "flags": signals.flags}),
    );
    Value::Object(map)
}

/// Attach the federation counterparty and contract scope.
pub fn inject_federation(input: Value, counterparty: Uuid, scope: &FederationScope) -> Value {
    let mut map = as_object(input);
    map.insert(
        "federation".to_string(),
        json!({
            "counterparty_org_id": counterparty.to_string(),
            "scope": {
                "allowed_actions": scope.allowed_actions,
                "allowed_resources": scope.allowed_resources,
            }
        }),
    );
    Value::Object(map)
}

/// Canonical form used for evaluation and token hashing: keys sorted at
/// every depth.
pub fn canonicalize(input: &Value) -> Value {
    match input {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for k in keys {
                out.insert(k.clone(), canonicalize(&map[k.as_str()]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

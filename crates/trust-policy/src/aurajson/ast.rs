// ast.rs - Parsed rule conditions.
//
// `when` clauses are parsed once at compile time into an immutable tree:
//
//   Expr::Always                      empty or absent `when`
//   Expr::And([..]) / Expr::Or([..])  {"and": [..]} / {"or": [..]}
//   Expr::Not(expr)                   {"not": {..}}
//   Expr::Fields([..])                {"path": {"op": value, ..}, ..}
//
// Every (path, op) pair inside Fields must hold for the expression to match.
// Evaluation walks the tree; it never re-inspects the raw JSON body.

use serde_json::{Map, Value};

use super::path::FieldPath;
use crate::error::PolicyError;

/// Comparison operator applied to a resolved field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
}

impl Op {
    fn parse(name: &str) -> Option<Op> {
        match name.to_ascii_lowercase().as_str() {
            "eq" => Some(Op::Eq),
            "neq" => Some(Op::Neq),
            "gt" => Some(Op::Gt),
            "gte" => Some(Op::Gte),
            "lt" => Some(Op::Lt),
            "lte" => Some(Op::Lte),
            "in" => Some(Op::In),
            "contains" => Some(Op::Contains),
            _ => None,
        }
    }
}

/// One field test: resolve `path`, then apply each operator to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub path: FieldPath,
    pub ops: Vec<(Op, Value)>,
}

/// A boolean expression over the input document.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Always,
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Fields(Vec<Condition>),
}

impl Expr {
    /// Parse an optional `when` value. Absent, null and `{}` all mean Always.
    pub fn parse_when(when: Option<&Value>) -> Result<Expr, PolicyError> {
        match when {
            None | Some(Value::Null) => Ok(Expr::Always),
            Some(Value::Object(map)) if map.is_empty() => Ok(Expr::Always),
            Some(Value::Object(map)) => Self::parse_object(map),
            Some(other) => Err(PolicyError::InvalidBody(format!(
                "expression must be an object, got {}",
                other
            ))),
        }
    }

    fn parse_object(map: &Map<String, Value>) -> Result<Expr, PolicyError> {
        let combinator = ["and", "or", "not"]
            .into_iter()
            .find(|k| map.contains_key(*k));

        if let Some(key) = combinator {
            if map.len() != 1 {
                return Err(PolicyError::InvalidBody(format!(
                    "'{}' cannot be mixed with other keys in one expression",
                    key
                )));
            }
            let value = &map[key];
            return match key {
                "not" => Ok(Expr::Not(Box::new(Self::parse_operand(value)?))),
                _ => {
                    let items = value.as_array().ok_or_else(|| {
                        PolicyError::InvalidBody(format!("'{}' expects an array", key))
                    })?;
                    let children = items
                        .iter()
                        .map(Self::parse_operand)
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(if key == "and" {
                        Expr::And(children)
                    } else {
                        Expr::Or(children)
                    })
                }
            };
        }

        let mut conditions = Vec::with_capacity(map.len());
        for (path, ops) in map {
            let ops = ops.as_object().ok_or_else(|| {
                PolicyError::InvalidBody(format!(
                    "field '{}' expects an object of operators",
                    path
                ))
            })?;
            let mut parsed = Vec::with_capacity(ops.len());
            for (name, rhs) in ops {
                let op = Op::parse(name).ok_or_else(|| {
                    PolicyError::InvalidBody(format!("unknown operator '{}' on '{}'", name, path))
                })?;
                parsed.push((op, rhs.clone()));
            }
            conditions.push(Condition {
                path: FieldPath::parse(path)?,
                ops: parsed,
            });
        }
        Ok(Expr::Fields(conditions))
    }

    fn parse_operand(value: &Value) -> Result<Expr, PolicyError> {
        match value {
            Value::Object(map) if map.is_empty() => Ok(Expr::Always),
            Value::Object(map) => Self::parse_object(map),
            other => Err(PolicyError::InvalidBody(format!(
                "expression must be an object, got {}",
                other
            ))),
        }
    }

    /// Evaluate against an input document.
    pub fn matches(&self, input: &Value) -> bool {
        match self {
            Expr::Always => true,
            Expr::And(children) => children.iter().all(|c| c.matches(input)),
            Expr::Or(children) => children.iter().any(|c| c.matches(input)),
            Expr::Not(inner) => !inner.matches(input),
            Expr::Fields(conditions) => conditions.iter().all(|c| c.matches(input)),
        }
    }
}

impl Condition {
    fn matches(&self, input: &Value) -> bool {
        let Some(value) = self.path.resolve(input) else {
            return false;
        };
        self.ops.iter().all(|(op, rhs)| apply(*op, value, rhs))
    }
}

fn apply(op: Op, lhs: &Value, rhs: &Value) -> bool {
    match op {
        Op::Eq => render(lhs) == render(rhs),
        Op::Neq => render(lhs) != render(rhs),
        Op::Gt => compare(lhs, rhs, |a, b| a > b),
        Op::Gte => compare(lhs, rhs, |a, b| a >= b),
        Op::Lt => compare(lhs, rhs, |a, b| a < b),
        Op::Lte => compare(lhs, rhs, |a, b| a <= b),
        Op::In => match rhs {
            Value::Array(items) => {
                let needle = render(lhs);
                items.iter().any(|item| render(item) == needle)
            }
            _ => false,
        },
        Op::Contains => match lhs {
            Value::Array(items) => {
                let needle = render(rhs);
                items.iter().any(|item| render(item) == needle)
            }
            _ => render(lhs).contains(&render(rhs)),
        },
    }
}

fn compare(lhs: &Value, rhs: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (to_f64(lhs), to_f64(rhs)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// Coerce a JSON number or numeric string to f64.
pub(crate) fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Loose string form used for equality and membership.
///
/// Strings render without quotes and integral floats render without a
/// fractional part, so `"7"`, `7` and `7.0` compare equal.
pub(crate) fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                n.to_string()
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
                    Some(f) => f.to_string(),
                    None => n.to_string(),
                }
            }
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expr(v: Value) -> Expr {
        Expr::parse_when(Some(&v)).unwrap()
    }

    #[test]
    fn empty_and_absent_match_unconditionally() {
        assert_eq!(Expr::parse_when(None).unwrap(), Expr::Always);
        assert!(expr(json!({})).matches(&json!({"anything": 1})));
    }

    #[test]
    fn eq_is_loose_across_numbers_and_strings() {
        let e = expr(json!({"count": {"eq": 7}}));
        assert!(e.matches(&json!({"count": 7})));
        assert!(e.matches(&json!({"count": 7.0})));
        assert!(e.matches(&json!({"count": "7"})));
        assert!(!e.matches(&json!({"count": 8})));
    }

    #[test]
    fn numeric_comparisons_coerce_strings() {
        let e = expr(json!({"risk.score": {"gte": 70}}));
        assert!(e.matches(&json!({"risk": {"score": 80}})));
        assert!(e.matches(&json!({"risk": {"score": "70"}})));
        assert!(!e.matches(&json!({"risk": {"score": 69.5}})));
        // Non-coercible operands never satisfy a comparison.
        assert!(!e.matches(&json!({"risk": {"score": "high"}})));
        assert!(!e.matches(&json!({"risk": {"score": true}})));
    }

    #[test]
    fn range_with_two_operators() {
        let e = expr(json!({"amount": {"gt": 10, "lte": 100}}));
        assert!(e.matches(&json!({"amount": 50})));
        assert!(!e.matches(&json!({"amount": 10})));
        assert!(!e.matches(&json!({"amount": 101})));
    }

    #[test]
    fn in_and_contains() {
        let e = expr(json!({"action": {"in": ["read", "list"]}}));
        assert!(e.matches(&json!({"action": "list"})));
        assert!(!e.matches(&json!({"action": "delete"})));

        let sub = expr(json!({"resource": {"contains": "invoices/"}}));
        assert!(sub.matches(&json!({"resource": "acme/invoices/42"})));

        let arr = expr(json!({"risk.flags": {"contains": "rate_spike"}}));
        assert!(arr.matches(&json!({"risk": {"flags": ["rate_spike"]}})));
        assert!(!arr.matches(&json!({"risk": {"flags": ["rate"]}})));
    }

    #[test]
    fn combinators_nest() {
        let e = expr(json!({
            "and": [
                {"action": {"eq": "transfer"}},
                {"or": [
                    {"amount": {"lt": 1000}},
                    {"not": {"user.tier": {"neq": "gold"}}}
                ]}
            ]
        }));
        assert!(e.matches(&json!({"action": "transfer", "amount": 10})));
        assert!(e.matches(&json!({"action": "transfer", "amount": 5000, "user": {"tier": "gold"}})));
        assert!(!e.matches(&json!({"action": "transfer", "amount": 5000, "user": {"tier": "free"}})));
        assert!(!e.matches(&json!({"action": "read", "amount": 1})));
    }

    #[test]
    fn missing_field_does_not_match() {
        let e = expr(json!({"user.id": {"neq": "x"}}));
        assert!(!e.matches(&json!({})));
    }

    #[test]
    fn malformed_expressions_rejected() {
        assert!(Expr::parse_when(Some(&json!({"and": {"a": {"eq": 1}}}))).is_err());
        assert!(Expr::parse_when(Some(&json!({"a": {"approx": 1}}))).is_err());
        assert!(Expr::parse_when(Some(&json!({"a": 1}))).is_err());
        assert!(Expr::parse_when(Some(&json!({"not": {}, "a": {"eq": 1}}))).is_err());
        assert!(Expr::parse_when(Some(&json!([1]))).is_err());
    }
}

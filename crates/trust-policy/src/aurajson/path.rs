// path.rs - Field-path addressing into JSON documents.
//
// A path is dot-separated. Each segment is a key, a key followed by one or more
// `[idx]` suffixes, or a bare integer that indexes the current array:
//
//   "risk.score"          → key risk, key score
//   "items[2].sku"        → key items, index 2, key sku
//   "matrix.1.0"          → key matrix, index 1, index 0
//
// Resolution never errors: a missing key, an out-of-range index, or indexing
// the wrong kind of value yields None, which makes the condition not match.

use std::fmt;

use serde_json::Value;

use crate::error::PolicyError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Parse a path string. Only malformed bracket syntax is rejected.
    pub fn parse(raw: &str) -> Result<Self, PolicyError> {
        if raw.is_empty() {
            return Err(PolicyError::InvalidBody("empty field path".to_string()));
        }
        let mut segments = Vec::new();
        for token in raw.split('.') {
            parse_token(raw, token, &mut segments)?;
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Resolve this path against a document.
    pub fn resolve<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        let mut cur = doc;
        for segment in &self.segments {
            cur = match (segment, cur) {
                (Segment::Key(k), Value::Object(map)) => map.get(k)?,
                (Segment::Index(i), Value::Array(items)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_token(raw: &str, token: &str, out: &mut Vec<Segment>) -> Result<(), PolicyError> {
    let invalid = |why: &str| PolicyError::InvalidBody(format!("field path '{}': {}", raw, why));

    if token.is_empty() {
        return Err(invalid("empty segment"));
    }
    if let Ok(idx) = token.parse::<usize>() {
        out.push(Segment::Index(idx));
        return Ok(());
    }

    let (name, mut rest) = match token.find('[') {
        Some(pos) => (&token[..pos], &token[pos..]),
        None => (token, ""),
    };
    if !name.is_empty() {
        out.push(Segment::Key(name.to_string()));
    }
    while !rest.is_empty() {
        let close = rest.find(']').ok_or_else(|| invalid("unclosed '['"))?;
        if !rest.starts_with('[') {
            return Err(invalid("unexpected characters after ']'"));
        }
        let idx = rest[1..close]
            .parse::<usize>()
            .map_err(|_| invalid("index must be a non-negative integer"))?;
        out.push(Segment::Index(idx));
        rest = &rest[close + 1..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolve(path: &str, doc: &Value) -> Option<Value> {
        FieldPath::parse(path).unwrap().resolve(doc).cloned()
    }

    #[test]
    fn nested_keys() {
        let doc = json!({"risk": {"score": 80}});
        assert_eq!(resolve("risk.score", &doc), Some(json!(80)));
    }

    #[test]
    fn bracket_and_bare_indices() {
        let doc = json!({"items": [{"sku": "a"}, {"sku": "b"}], "m": [[1, 2], [3, 4]]});
        assert_eq!(resolve("items[1].sku", &doc), Some(json!("b")));
        assert_eq!(resolve("items.0.sku", &doc), Some(json!("a")));
        assert_eq!(resolve("m[1][0]", &doc), Some(json!(3)));
        assert_eq!(resolve("m.1.1", &doc), Some(json!(4)));
    }

    #[test]
    fn missing_paths_resolve_to_none() {
        let doc = json!({"items": [1], "name": "x"});
        assert_eq!(resolve("absent", &doc), None);
        assert_eq!(resolve("items[5]", &doc), None);
        assert_eq!(resolve("items.sku", &doc), None);
        assert_eq!(resolve("name.0", &doc), None);
    }

    #[test]
    fn malformed_brackets_rejected() {
        assert!(FieldPath::parse("items[x]").is_err());
        assert!(FieldPath::parse("items[1").is_err());
        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse("").is_err());
    }
}

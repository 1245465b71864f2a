// canonical.rs - Stable JSON encoding and hashing helpers.
//
// Canonical form = object keys sorted lexicographically at every depth, no
// insignificant whitespace. The encoder sorts explicitly instead of relying on
// serde_json's map type, which changes ordering when `preserve_order` is
// enabled anywhere in the dependency graph.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a JSON value with keys sorted at every level.
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Canonical bytes of a JSON value.
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    to_canonical_string(value).into_bytes()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Serializing a &str cannot fail.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Lowercase hex SHA-256 of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("{:x}", digest)
}

/// Correlation id for an (input, policy body) pair: the first 8 bytes of
/// SHA-256(canonical input ‖ canonical body), hex-encoded.
///
/// Deterministic so that replays of the same request share a trace id. Not a
/// security primitive.
pub fn trace_id(input: &Value, body: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(to_canonical_bytes(input));
    hasher.update(to_canonical_bytes(body));
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sorted_at_every_depth() {
        let v = json!({"b": {"z": 1, "a": [ {"y": true, "x": null} ]}, "a": "s"});
        assert_eq!(
            to_canonical_string(&v),
            r#"{"a":"s","b":{"a":[{"x":null,"y":true}],"z":1}}"#
        );
    }

    #[test]
    fn strings_are_escaped() {
        let v = json!({"quote\"key": "line\nbreak"});
        assert_eq!(to_canonical_string(&v), r#"{"quote\"key":"line\nbreak"}"#);
    }

    #[test]
    fn trace_id_is_16_hex_chars_and_stable() {
        let input = json!({"action": "read", "risk": {"score": 10}});
        let body = json!({"rules": []});
        let first = trace_id(&input, &body);
        assert_eq!(first.len(), 16);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        let reordered = json!({"risk": {"score": 10}, "action": "read"});
        assert_eq!(first, trace_id(&reordered, &body));
    }

    #[test]
    fn sha256_known_value() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}

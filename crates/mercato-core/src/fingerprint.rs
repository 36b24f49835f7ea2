//! Request fingerprints for the idempotency ledger.
//!
//! A fingerprint is the SHA-256 of the request body after normalization:
//! object keys sorted recursively and `null` members dropped, so that
//! `{"b":1,"a":null}` and `{"b":1}` are the same request. Array order is
//! significant. The fingerprint is stored with the idempotency record and
//! never changes afterwards.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Returns the canonical form of a JSON value.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> =
                map.iter().filter(|(_, v)| !v.is_null()).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), normalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

/// Hex SHA-256 of the normalized body.
pub fn fingerprint(body: &Value) -> String {
    let canonical = normalize(body).to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a = json!({"transaction_id": "t1", "lines": [{"sku": "A", "qty": 2}]});
        let b = json!({"lines": [{"qty": 2, "sku": "A"}], "transaction_id": "t1"});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_null_members_are_ignored() {
        let a = json!({"reason": null, "amount": 100});
        let b = json!({"amount": 100});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_values_and_array_order_matter() {
        let base = fingerprint(&json!({"amount": 100, "epcs": ["A", "B"]}));
        assert_ne!(base, fingerprint(&json!({"amount": 101, "epcs": ["A", "B"]})));
        assert_ne!(base, fingerprint(&json!({"amount": 100, "epcs": ["B", "A"]})));
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint(&json!({}));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

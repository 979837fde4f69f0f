//! Deterministic JSON encoding for everything written to world state or
//! emitted as an event.
//!
//! Replicas must turn the same logical write into the same bytes, so object
//! keys are sorted recursively before encoding and no whitespace is emitted.
//! Sorting is done explicitly rather than relying on the map type behind
//! `serde_json::Value`, which changes when any crate in the build enables
//! `preserve_order`.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StorageError;

/// Encode `value` as canonical JSON bytes
pub fn to_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StorageError> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&canonicalize(value))?)
}

/// Recursively rebuild `value` with object keys in byte order
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::new();
            for (key, nested) in entries {
                sorted.insert(key, canonicalize(nested));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// BLAKE3 digest over a key-ordered sequence of world-state entries.
///
/// Each key and value is length-prefixed so entry boundaries cannot be shifted.
pub fn state_digest<'a, I>(entries: I) -> [u8; 32]
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"CREDIT_LEDGER_State");
    for (key, value) in entries {
        hasher.update(&(key.len() as u64).to_le_bytes());
        hasher.update(key.as_bytes());
        hasher.update(&(value.len() as u64).to_le_bytes());
        hasher.update(value);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_keys_sorted_recursively() {
        let value = json!({
            "zeta": 1,
            "alpha": {"y": [ {"b": 1, "a": 2} ], "x": null},
        });
        let bytes = to_canonical_json(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"alpha":{"x":null,"y":[{"a":2,"b":1}]},"zeta":1}"#
        );
    }

    #[test]
    fn test_hash_map_order_does_not_leak() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for key in ["ownerId", "id", "status", "docType", "category"] {
            first.insert(key, key.len());
        }
        for key in ["category", "docType", "status", "id", "ownerId"] {
            second.insert(key, key.len());
        }
        assert_eq!(
            to_canonical_json(&first).unwrap(),
            to_canonical_json(&second).unwrap()
        );
    }

    #[test]
    fn test_state_digest_boundaries() {
        let a = state_digest([("ab", b"c".as_slice())]);
        let b = state_digest([("a", b"bc".as_slice())]);
        assert_ne!(a, b);

        let again = state_digest([("ab", b"c".as_slice())]);
        assert_eq!(a, again);
    }
}

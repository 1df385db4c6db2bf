//! Canonical JSON helpers for model artifacts.
//!
//! Object keys are sorted recursively so that the same artifact always
//! serializes to the same bytes and therefore the same content hash.

use serde::{ser::Error as SerdeSerError, Serialize};
use serde_json::{map::Map, ser::PrettyFormatter, Serializer, Value};
use std::io::Write;

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::with_capacity(entries.len());
            for (key, val) in entries {
                sorted.insert(key, canonicalize(val));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Write `value` as canonical, two-space indented JSON.
pub fn write_canonical_json<T, W>(mut writer: W, value: &T) -> Result<(), serde_json::Error>
where
    T: Serialize,
    W: Write,
{
    let canonical = canonicalize(serde_json::to_value(value)?);
    let formatter = PrettyFormatter::with_indent(b"  ");
    let mut serializer = Serializer::with_formatter(&mut writer, formatter);
    canonical.serialize(&mut serializer)?;
    Ok(())
}

/// Canonical JSON as an owned string.
pub fn canonical_json_string<T>(value: &T) -> Result<String, serde_json::Error>
where
    T: Serialize,
{
    let mut buffer = Vec::new();
    write_canonical_json(&mut buffer, value)?;
    String::from_utf8(buffer).map_err(|err| SerdeSerError::custom(err.to_string()))
}

/// Canonical JSON as bytes, ready for a byte-oriented store.
pub fn canonical_json_bytes<T>(value: &T) -> Result<Vec<u8>, serde_json::Error>
where
    T: Serialize,
{
    let mut buffer = Vec::new();
    write_canonical_json(&mut buffer, value)?;
    Ok(buffer)
}

/// BLAKE3 hex digest of the canonical JSON form.
pub fn canonical_hash<T>(value: &T) -> Result<String, serde_json::Error>
where
    T: Serialize,
{
    let bytes = canonical_json_bytes(value)?;
    Ok(hex::encode(blake3::hash(&bytes).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn keys_are_sorted_recursively() {
        let mut inner = HashMap::new();
        inner.insert("zeta", 1);
        inner.insert("alpha", 2);
        let mut outer = HashMap::new();
        outer.insert("outer_b", inner.clone());
        outer.insert("outer_a", inner);

        let json = canonical_json_string(&outer).unwrap();
        let a = json.find("outer_a").unwrap();
        let b = json.find("outer_b").unwrap();
        assert!(a < b);
        let alpha = json.find("alpha").unwrap();
        let zeta = json.find("zeta").unwrap();
        assert!(alpha < zeta);
    }

    #[test]
    fn hash_is_stable_across_insertion_order() {
        let mut first = HashMap::new();
        first.insert("b", 2.5);
        first.insert("a", 1.0);
        let mut second = HashMap::new();
        second.insert("a", 1.0);
        second.insert("b", 2.5);

        assert_eq!(canonical_hash(&first).unwrap(), canonical_hash(&second).unwrap());
    }
}

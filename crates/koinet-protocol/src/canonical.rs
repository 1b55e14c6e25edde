//! Canonical JSON serialization.
//!
//! Content hashes and envelope signatures are computed over a canonical
//! form: object keys sorted bytewise at every nesting level, compact
//! separators, no trailing whitespace. Two nodes serializing the same
//! value therefore always produce identical bytes.

use koinet_crypto::hash::sha256_hex;
use koinet_types::{KoiNetError, Result};
use serde_json::{Map, Value};

/// Returns a copy of `value` with every object's keys sorted.
///
/// `serde_json::Map` already iterates in key order when the
/// `preserve_order` feature is off; sorting explicitly keeps the
/// canonical form independent of feature unification.
fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), sort_value(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

/// Serializes a JSON value to its canonical string form.
pub fn canonical_json(value: &Value) -> Result<String> {
    serde_json::to_string(&sort_value(value)).map_err(|e| KoiNetError::ProtocolError {
        reason: format!("canonical serialization failed: {e}"),
    })
}

/// Computes the SHA-256 hex digest of a value's canonical JSON form.
///
/// This is the `sha256_hash` recorded in manifests.
pub fn content_hash(value: &Value) -> Result<String> {
    Ok(sha256_hex(&canonical_json(value)?))
}

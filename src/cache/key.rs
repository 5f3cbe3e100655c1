use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use crate::error::Result;

/// `prefix:{canonical json}` with object keys sorted at every depth. When the
/// serialized parameters exceed `threshold` bytes they are replaced by their
/// SHA-256 hex digest.
pub fn derive_key<P: Serialize + ?Sized>(prefix: &str, params: &P, threshold: usize) -> Result<String> {
    let canonical = canonicalize(serde_json::to_value(params)?);
    let serialized = serde_json::to_string(&canonical)?;

    if serialized.len() > threshold {
        let digest = Sha256::digest(serialized.as_bytes());
        return Ok(format!("{}:{}", prefix, hex::encode(digest)));
    }
    Ok(format!("{}:{}", prefix, serialized))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

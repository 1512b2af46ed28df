//! Canonical JSON and content hashing
//!
//! The content hash is the only signal used to notice that a remote copy
//! drifted, so the serialization must be byte-for-byte reproducible:
//! keys sorted by byte order at every level, no whitespace, non-ASCII
//! characters written as-is (UTF-8), SHA-256 rendered as lowercase hex.

use crate::entry::{Entries, is_metadata_key};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

fn write_canonical(value: &Value, out: &mut String) -> serde_json::Result<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(&serde_json::to_string(s)?),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[*key], out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// Serialize a JSON value in canonical form
pub fn to_canonical_string(value: &Value) -> serde_json::Result<String> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

/// Build the hashed document `{key → {t, v}} ∪ {"_uuid": uuid}`
///
/// Metadata-prefixed keys in `entries` are skipped.
pub fn hash_document(entries: &Entries, uuid: &str) -> Value {
    let mut doc = Map::new();
    for (key, entry) in entries.iter().filter(|(k, _)| !is_metadata_key(k)) {
        let mut obj = Map::new();
        obj.insert("v".to_string(), Value::String(entry.value.clone()));
        obj.insert("t".to_string(), Value::String(entry.tag.code().to_string()));
        doc.insert(key.clone(), Value::Object(obj));
    }
    doc.insert("_uuid".to_string(), Value::String(uuid.to_string()));
    Value::Object(doc)
}

/// Lowercase hex SHA-256 of arbitrary bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Content hash of a mapping under the given identity
pub fn content_hash(entries: &Entries, uuid: &str) -> String {
    let doc = hash_document(entries, uuid);
    // Strings and objects only; serialization of this document cannot fail.
    let canonical = to_canonical_string(&doc).unwrap_or_default();
    sha256_hex(canonical.as_bytes())
}

//! Content hashing for change detection
//!
//! Records are hashed over a canonical serialization: object keys are sorted
//! at every nesting level and the output is compact, so two records that only
//! differ in key order produce the same digest. The digest is SHA256, hex
//! encoded, and is compared against the stored hash to decide whether a row
//! needs to be rewritten.

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a hex-encoded SHA256 digest
pub const CONTENT_HASH_LEN: usize = 64;

/// Hex-encoded SHA256 digest of a record's canonical form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash already-canonical bytes
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Wrap a digest read back from the store
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Serializes a JSON value with object keys in sorted order.
///
/// `serde_json::Map` only sorts when the `preserve_order` feature is off, and
/// feature unification can turn it on from anywhere in the dependency graph,
/// so ordering is enforced here instead of relied upon.
struct Canonical<'a>(&'a Value);

impl Serialize for Canonical<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

                let mut out = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    out.serialize_entry(key, &Canonical(value))?;
                }
                out.end()
            }
            Value::Array(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(&Canonical(item))?;
                }
                out.end()
            }
            scalar => scalar.serialize(serializer),
        }
    }
}

/// Canonical compact JSON for a value (sorted keys, no whitespace)
///
/// Serializing a `Value` into memory does not fail in practice; the `Result`
/// is serde_json's signature.
pub fn canonical_json(value: &Value) -> serde_json::Result<String> {
    serde_json::to_string(&Canonical(value))
}

/// Canonical form and its digest, computed in one pass
pub fn canonicalize(value: &Value) -> serde_json::Result<(String, ContentHash)> {
    let canonical = canonical_json(value)?;
    let hash = ContentHash::of_bytes(canonical.as_bytes());
    Ok((canonical, hash))
}

/// Compute the content hash of a record
pub fn content_hash(value: &Value) -> serde_json::Result<ContentHash> {
    canonicalize(value).map(|(_, hash)| hash)
}

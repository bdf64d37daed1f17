//! Entity records and the rows derived from them

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MalformedInputError;
use crate::hash::{ContentHash, canonicalize};

/// Default name of the array property holding the records
pub const DEFAULT_RECORDS_KEY: &str = "coveredEntities";

/// Default name of the integer identifier field
pub const DEFAULT_ID_FIELD: &str = "ceId";

/// Default name of the secondary (program) identifier field
pub const DEFAULT_SECONDARY_ID_FIELD: &str = "id340B";

/// Where records live in the source document and which fields identify them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLayout {
    /// Top-level property holding the records array
    #[serde(default = "default_records_key")]
    pub records_key: String,
    /// Integer field that uniquely identifies a record
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// String field carrying the secondary identifier
    #[serde(default = "default_secondary_id_field")]
    pub secondary_id_field: String,
}

fn default_records_key() -> String {
    DEFAULT_RECORDS_KEY.to_string()
}

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

fn default_secondary_id_field() -> String {
    DEFAULT_SECONDARY_ID_FIELD.to_string()
}

impl Default for SourceLayout {
    fn default() -> Self {
        Self {
            records_key: default_records_key(),
            id_field: default_id_field(),
            secondary_id_field: default_secondary_id_field(),
        }
    }
}

/// One element of the source array
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Position in the source array (0-based)
    pub index: usize,
    /// Unique identifier
    pub id: i64,
    /// Secondary identifier, NULL when absent
    pub secondary_id: Option<String>,
    /// All fields of the record, verbatim
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    /// Validate a decoded array element and extract its identifiers
    pub fn from_value(
        value: Value,
        layout: &SourceLayout,
        index: usize,
    ) -> Result<Self, MalformedInputError> {
        let fields = match value {
            Value::Object(map) => map,
            other => {
                return Err(MalformedInputError::InvalidRecord {
                    index,
                    reason: format!("expected an object, found {}", json_type_name(&other)),
                });
            }
        };

        let id = match fields.get(&layout.id_field) {
            Some(Value::Number(n)) => n.as_i64(),
            _ => None,
        }
        .ok_or_else(|| MalformedInputError::InvalidRecord {
            index,
            reason: format!("missing or non-integer \"{}\"", layout.id_field),
        })?;

        let secondary_id = match fields.get(&layout.secondary_id_field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(MalformedInputError::InvalidRecord {
                    index,
                    reason: format!(
                        "\"{}\" must be a string, found {}",
                        layout.secondary_id_field,
                        json_type_name(other)
                    ),
                });
            }
        };

        Ok(Self {
            index,
            id,
            secondary_id,
            fields,
        })
    }
}

/// A record prepared for the upsert: identifiers, canonical payload and hash
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRow {
    pub id: i64,
    pub secondary_id: Option<String>,
    /// Canonical JSON text of the record
    pub payload: String,
    pub content_hash: ContentHash,
}

impl BatchRow {
    /// Derive the row for a record, hashing its canonical form
    pub fn from_record(record: EntityRecord) -> Result<Self, MalformedInputError> {
        let index = record.index;
        let value = Value::Object(record.fields);
        let (payload, content_hash) =
            canonicalize(&value).map_err(|source| MalformedInputError::Json { index, source })?;

        Ok(Self {
            id: record.id,
            secondary_id: record.secondary_id,
            payload,
            content_hash,
        })
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

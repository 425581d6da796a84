//! Change event envelope
//!
//! Decodes the Debezium-style JSON envelope:
//!
//! ```json
//! {
//!   "before": null,
//!   "after": {"id": 1, "username": "testuser"},
//!   "source": {"db": "inventory", "table": "users"},
//!   "op": "c",
//!   "ts_ms": 1700000000000
//! }
//! ```
//!
//! Unknown fields are ignored. A `{"schema": ..., "payload": ...}` wrapper as
//! produced by converters with schemas enabled is unwrapped. An absent or
//! empty body is a tombstone.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use streamshift_rdbc::{Row, Value};

use crate::error::{ReplicationError, Result};
use crate::types::TableId;

/// Change operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Row created (`c`)
    Create,
    /// Row updated (`u`)
    Update,
    /// Row deleted (`d`)
    Delete,
    /// Row emitted by an initial snapshot (`r`)
    Read,
    /// Any other operation code
    Unknown(String),
}

impl Operation {
    /// Parse a single-letter operation code
    pub fn from_code(code: &str) -> Self {
        match code {
            "c" => Self::Create,
            "u" => Self::Update,
            "d" => Self::Delete,
            "r" => Self::Read,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The wire code of this operation
    pub fn code(&self) -> &str {
        match self {
            Self::Create => "c",
            Self::Update => "u",
            Self::Delete => "d",
            Self::Read => "r",
            Self::Unknown(code) => code,
        }
    }

    /// Human-readable operation name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Read => "SNAPSHOT",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Self::from_code(&code))
    }
}

/// The `source` block of an envelope
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SourceInfo {
    /// Source database
    #[serde(default)]
    pub db: String,
    /// Source schema, when the connector reports one
    #[serde(default)]
    pub schema: Option<String>,
    /// Source table
    #[serde(default)]
    pub table: String,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    before: Option<Map<String, JsonValue>>,
    #[serde(default)]
    after: Option<Map<String, JsonValue>>,
    source: SourceInfo,
    op: Operation,
    #[serde(default)]
    ts_ms: Option<i64>,
}

/// One decoded change event
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Row image before the change
    pub before: Option<Row>,
    /// Row image after the change
    pub after: Option<Row>,
    /// Where the change happened
    pub source: SourceInfo,
    /// What happened
    pub op: Operation,
    /// Capture timestamp (not used by mutation logic)
    pub ts_ms: Option<i64>,
}

impl ChangeEvent {
    /// Decode an envelope from its JSON payload
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        let mut value: JsonValue = serde_json::from_slice(payload)
            .map_err(|e| ReplicationError::decode(e.to_string()))?;

        if let JsonValue::Object(obj) = &mut value {
            if !obj.contains_key("op") {
                if let Some(inner) = obj.remove("payload") {
                    value = inner;
                }
            }
        }

        let raw: RawEnvelope =
            serde_json::from_value(value).map_err(|e| ReplicationError::decode(e.to_string()))?;

        if raw.source.table.is_empty() {
            return Err(ReplicationError::decode("envelope has no source table"));
        }

        Ok(Self {
            before: raw.before.as_ref().map(json_object_to_row),
            after: raw.after.as_ref().map(json_object_to_row),
            source: raw.source,
            op: raw.op,
            ts_ms: raw.ts_ms,
        })
    }

    /// Identity of the table this event belongs to
    pub fn table_id(&self) -> TableId {
        TableId::new(&self.source.db, &self.source.table)
    }

    /// Row image usable as a schema-inference sample (`after`, else `before`)
    pub fn sample_row(&self) -> Option<&Row> {
        self.after.as_ref().or(self.before.as_ref())
    }
}

/// Whether a raw payload is a tombstone
pub fn is_tombstone(payload: Option<&[u8]>) -> bool {
    match payload {
        None => true,
        Some(bytes) => {
            let trimmed = bytes.trim_ascii();
            trimmed.is_empty() || trimmed == b"null"
        }
    }
}

/// Convert a JSON object into a row, keeping field order
pub fn json_object_to_row(obj: &Map<String, JsonValue>) -> Row {
    obj.iter()
        .map(|(k, v)| (k.clone(), json_to_value(v)))
        .collect()
}

/// Convert a JSON scalar into a typed value.
///
/// Integers that fit 32 bits become `Int32`, other integers `Int64`.
/// Objects and arrays are carried as JSON.
pub fn json_to_value(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                match i32::try_from(i) {
                    Ok(small) => Value::Int32(small),
                    Err(_) => Value::Int64(i),
                }
            } else {
                n.as_f64().map(Value::Float64).unwrap_or(Value::Null)
            }
        }
        JsonValue::String(s) => Value::String(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => Value::Json(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_codes() {
        assert_eq!(Operation::from_code("c"), Operation::Create);
        assert_eq!(Operation::from_code("u"), Operation::Update);
        assert_eq!(Operation::from_code("d"), Operation::Delete);
        assert_eq!(Operation::from_code("r"), Operation::Read);
        assert_eq!(Operation::from_code("t"), Operation::Unknown("t".into()));
        assert_eq!(Operation::Read.to_string(), "SNAPSHOT");
        assert_eq!(Operation::Unknown("x".into()).code(), "x");
    }

    #[test]
    fn test_decode_create() {
        let payload = br#"{
            "before": null,
            "after": {"id": 1, "username": "testuser"},
            "source": {"db": "inventory", "table": "users", "version": "2.5.0"},
            "op": "c",
            "ts_ms": 1700000000000,
            "transaction": null
        }"#;

        let event = ChangeEvent::from_slice(payload).unwrap();
        assert_eq!(event.op, Operation::Create);
        assert_eq!(event.table_id(), TableId::new("inventory", "users"));
        assert!(event.before.is_none());
        let after = event.after.unwrap();
        assert_eq!(after.columns(), &["id", "username"]);
        assert_eq!(after.values(), &[Value::Int32(1), Value::from("testuser")]);
        assert_eq!(event.ts_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn test_decode_unwraps_schema_payload() {
        let payload = br#"{
            "schema": {"type": "struct"},
            "payload": {
                "before": {"id": 7},
                "after": null,
                "source": {"db": "inventory", "table": "orders"},
                "op": "d"
            }
        }"#;

        let event = ChangeEvent::from_slice(payload).unwrap();
        assert_eq!(event.op, Operation::Delete);
        assert_eq!(event.sample_row().unwrap().get_by_name("id"), Some(&Value::Int32(7)));
    }

    #[test]
    fn test_decode_failures() {
        assert!(matches!(
            ChangeEvent::from_slice(b"{not json"),
            Err(ReplicationError::Decode(_))
        ));
        assert!(matches!(
            ChangeEvent::from_slice(br#"{"op": "c", "after": {}}"#),
            Err(ReplicationError::Decode(_))
        ));
        assert!(matches!(
            ChangeEvent::from_slice(br#"{"op": "c", "source": {"db": "x"}}"#),
            Err(ReplicationError::Decode(_))
        ));
    }

    #[test]
    fn test_tombstones() {
        assert!(is_tombstone(None));
        assert!(is_tombstone(Some(b"")));
        assert!(is_tombstone(Some(b"  \n")));
        assert!(is_tombstone(Some(b"null")));
        assert!(!is_tombstone(Some(b"{}")));
    }

    #[test]
    fn test_json_number_widths() {
        assert_eq!(json_to_value(&serde_json::json!(42)), Value::Int32(42));
        assert_eq!(
            json_to_value(&serde_json::json!(2_147_483_648_i64)),
            Value::Int64(2_147_483_648)
        );
        assert_eq!(json_to_value(&serde_json::json!(1.5)), Value::Float64(1.5));
        assert!(matches!(
            json_to_value(&serde_json::json!({"a": 1})),
            Value::Json(_)
        ));
    }
}

//! Row values read from the source.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// A single source cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    /// Array column contents.
    Sequence(Vec<SourceValue>),
    /// JSON document.
    Structured(JsonValue),
}

impl SourceValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SourceValue::Null)
    }

    /// Convert a decoded JSON value, keeping arrays as sequences.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => SourceValue::Null,
            JsonValue::Bool(b) => SourceValue::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => SourceValue::Int(i),
                None => n
                    .as_f64()
                    .map(SourceValue::Float)
                    .unwrap_or_else(|| SourceValue::Text(n.to_string())),
            },
            JsonValue::String(s) => SourceValue::Text(s),
            JsonValue::Array(items) => {
                SourceValue::Sequence(items.into_iter().map(SourceValue::from_json).collect())
            }
            object @ JsonValue::Object(_) => SourceValue::Structured(object),
        }
    }

    /// JSON form of this value, used when a value lands in a json column.
    pub fn to_json(&self) -> JsonValue {
        match self {
            SourceValue::Null => JsonValue::Null,
            SourceValue::Bool(b) => JsonValue::Bool(*b),
            SourceValue::Int(i) => JsonValue::from(*i),
            SourceValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SourceValue::Text(s) => JsonValue::String(s.clone()),
            SourceValue::Bytes(b) => JsonValue::String(format!("\\x{}", hex::encode(b))),
            SourceValue::Timestamp(ts) => JsonValue::String(ts.to_rfc3339()),
            SourceValue::Sequence(items) => {
                JsonValue::Array(items.iter().map(SourceValue::to_json).collect())
            }
            SourceValue::Structured(v) => v.clone(),
        }
    }

    /// Text form used for equality checks by the identifier remap.
    pub fn as_text(&self) -> Option<String> {
        match self {
            SourceValue::Null => None,
            SourceValue::Bool(b) => Some(b.to_string()),
            SourceValue::Int(i) => Some(i.to_string()),
            SourceValue::Float(f) => Some(f.to_string()),
            SourceValue::Text(s) => Some(s.clone()),
            SourceValue::Bytes(b) => Some(format!("\\x{}", hex::encode(b))),
            SourceValue::Timestamp(ts) => Some(ts.to_rfc3339()),
            SourceValue::Sequence(_) | SourceValue::Structured(_) => Some(self.to_json().to_string()),
        }
    }
}

impl From<Option<SourceValue>> for SourceValue {
    fn from(value: Option<SourceValue>) -> Self {
        value.unwrap_or(SourceValue::Null)
    }
}

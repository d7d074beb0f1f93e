//! SQL literal encoding of source values for a target column type.
//!
//! Dispatch order matters: array columns are checked before structured
//! values so a Postgres array is never written as a JSON document.

use crate::identifier::quote_literal;
use crate::typemap::{array_cast, is_array_type, is_timestamptz_type};
use crate::value::SourceValue;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Target column type as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnType {
    pub data_type: String,
    pub udt_name: String,
}

impl ColumnType {
    pub fn new(data_type: impl Into<String>, udt_name: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            udt_name: udt_name.into(),
        }
    }
}

/// Encode `value` as a literal suitable for a VALUES list targeting `column`.
pub fn encode(value: &SourceValue, column: &ColumnType) -> String {
    if value.is_null() {
        return "NULL".to_string();
    }

    if is_timestamptz_type(&column.data_type, &column.udt_name) {
        return encode_timestamptz(value);
    }

    if is_array_type(&column.data_type, &column.udt_name) {
        return match value {
            SourceValue::Sequence(items) => format!(
                "ARRAY[{}]::{}",
                items.iter().map(encode_array_element).collect::<Vec<_>>().join(","),
                array_cast(&column.udt_name)
            ),
            _ => "NULL".to_string(),
        };
    }

    match value {
        SourceValue::Structured(_) | SourceValue::Sequence(_) => {
            let cast = if column.udt_name == "json" { "json" } else { "jsonb" };
            format!("{}::{}", quote_literal(&value.to_json().to_string()), cast)
        }
        SourceValue::Bool(b) => b.to_string(),
        SourceValue::Bytes(bytes) => format!("'\\x{}'::bytea", hex::encode(bytes)),
        SourceValue::Timestamp(ts) => quote_literal(&iso_instant(ts)),
        SourceValue::Int(i) => quote_literal(&i.to_string()),
        SourceValue::Float(f) => quote_literal(&f.to_string()),
        SourceValue::Text(s) => quote_literal(s),
        SourceValue::Null => "NULL".to_string(),
    }
}

fn encode_timestamptz(value: &SourceValue) -> String {
    let text = match value {
        SourceValue::Timestamp(ts) => iso_instant(ts),
        SourceValue::Text(s) => normalize_instant(s),
        SourceValue::Structured(envelope) => match unwrap_envelope(envelope) {
            Some(JsonValue::String(s)) => normalize_instant(s),
            Some(JsonValue::Number(n)) => n.to_string(),
            _ => envelope.to_string(),
        },
        other => other.as_text().unwrap_or_default(),
    };
    format!("{}::timestamptz", quote_literal(&text))
}

/// Pull the instant out of `{"timestamp": ...}` or `{"value": ...}`.
fn unwrap_envelope(envelope: &JsonValue) -> Option<&JsonValue> {
    let object = envelope.as_object()?;
    ["timestamp", "value"]
        .iter()
        .filter_map(|key| object.get(*key))
        .find(|inner| !inner.is_null())
}

fn iso_instant(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// RFC 3339 input is rewritten in UTC; anything else is left for the server to parse.
fn normalize_instant(text: &str) -> String {
    match DateTime::parse_from_rfc3339(text) {
        Ok(parsed) => iso_instant(&parsed.with_timezone(&Utc)),
        Err(_) => text.to_string(),
    }
}

fn encode_array_element(item: &SourceValue) -> String {
    match item {
        SourceValue::Null => "NULL".to_string(),
        SourceValue::Bool(b) => b.to_string(),
        SourceValue::Int(i) => i.to_string(),
        SourceValue::Float(f) if f.is_finite() => f.to_string(),
        SourceValue::Float(f) => quote_literal(&f.to_string()),
        SourceValue::Text(s) => quote_literal(s),
        SourceValue::Bytes(bytes) => quote_literal(&format!("\\x{}", hex::encode(bytes))),
        SourceValue::Timestamp(ts) => quote_literal(&iso_instant(ts)),
        SourceValue::Sequence(items) => format!(
            "ARRAY[{}]",
            items.iter().map(encode_array_element).collect::<Vec<_>>().join(",")
        ),
        SourceValue::Structured(v) => quote_literal(&v.to_string()),
    }
}

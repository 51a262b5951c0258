//! Row and primary-key value types shared by the persistence and cache layers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A persisted row: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// A primary-key value.
///
/// Displayed without quotes, which is the form used inside cache keys
/// (`shop.Game-66`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Read a primary-key value out of a JSON value.
    ///
    /// Integral numbers and non-empty strings qualify; numeric strings are kept
    /// as text so the cache key matches what the caller supplied.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordId::Int),
            Value::String(s) if !s.is_empty() => Some(RecordId::Text(s.clone())),
            _ => None,
        }
    }

    /// Parse a path segment, preferring the integer form.
    pub fn parse(raw: &str) -> Self {
        raw.parse::<i64>()
            .map(RecordId::Int)
            .unwrap_or_else(|_| RecordId::Text(raw.to_string()))
    }

    pub fn to_json(&self) -> Value {
        match self {
            RecordId::Int(i) => Value::from(*i),
            RecordId::Text(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(i) => write!(f, "{i}"),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Int(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_is_unquoted() {
        assert_eq!(RecordId::Int(66).to_string(), "66");
        assert_eq!(RecordId::from("abc-1").to_string(), "abc-1");
    }

    #[test]
    fn test_from_json() {
        assert_eq!(RecordId::from_json(&json!(7)), Some(RecordId::Int(7)));
        assert_eq!(RecordId::from_json(&json!("7")), Some(RecordId::Text("7".into())));
        assert_eq!(RecordId::from_json(&json!("")), None);
        assert_eq!(RecordId::from_json(&json!(1.5)), None);
        assert_eq!(RecordId::from_json(&Value::Null), None);
    }

    #[test]
    fn test_parse_prefers_int() {
        assert_eq!(RecordId::parse("42"), RecordId::Int(42));
        assert_eq!(RecordId::parse("u-42"), RecordId::Text("u-42".into()));
    }

    #[test]
    fn test_json_round_trip_shape() {
        assert_eq!(RecordId::Int(3).to_json(), json!(3));
        assert_eq!(RecordId::from("k").to_json(), json!("k"));
    }
}

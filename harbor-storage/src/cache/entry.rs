//! On-disk record format of the file-backed cache.
//!
//! One record per key: `flag^ttl^payload`, where `flag` is `1` for a
//! serialized structured value and `0` for a literal scalar, and `ttl` is the
//! lifetime in seconds measured from the file's modification time (`0` never
//! expires). The payload is the remainder of the record and may itself
//! contain the delimiter.

use std::time::{Duration, SystemTime};

use harbor_core::HarborResult;
use serde_json::Value;
use thiserror::Error;

use super::traits::CacheValue;

/// Separator between the flag, ttl and payload fields.
pub const FIELD_DELIMITER: char = '^';

/// Why a stored record could not be split into its fields.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntryDecodeError {
    #[error("record is missing the {0} field")]
    MissingField(&'static str),

    #[error("record flag is not 0 or 1: {0}")]
    InvalidFlag(String),

    #[error("record ttl is not a number: {0}")]
    InvalidTtl(String),
}

/// A decoded `flag^ttl^payload` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub structured: bool,
    pub ttl_secs: u64,
    pub payload: String,
}

impl CacheEntry {
    /// Build the record for `value`.
    pub fn from_value(value: &CacheValue, ttl_secs: u64) -> HarborResult<Self> {
        let entry = match value {
            CacheValue::Structured(v) => Self {
                structured: true,
                ttl_secs,
                payload: serde_json::to_string(v)?,
            },
            CacheValue::Scalar(s) => Self {
                structured: false,
                ttl_secs,
                payload: s.clone(),
            },
        };
        Ok(entry)
    }

    pub fn encode(&self) -> String {
        format!(
            "{flag}{d}{ttl}{d}{payload}",
            flag = u8::from(self.structured),
            d = FIELD_DELIMITER,
            ttl = self.ttl_secs,
            payload = self.payload
        )
    }

    pub fn decode(raw: &str) -> Result<Self, EntryDecodeError> {
        let mut fields = raw.splitn(3, FIELD_DELIMITER);
        let flag = fields.next().ok_or(EntryDecodeError::MissingField("flag"))?;
        let ttl = fields.next().ok_or(EntryDecodeError::MissingField("ttl"))?;
        let payload = fields
            .next()
            .ok_or(EntryDecodeError::MissingField("payload"))?;

        let structured = match flag.trim() {
            "1" => true,
            "0" | "" => false,
            other => return Err(EntryDecodeError::InvalidFlag(other.to_string())),
        };
        let ttl_secs = ttl
            .trim()
            .parse::<u64>()
            .map_err(|_| EntryDecodeError::InvalidTtl(ttl.to_string()))?;

        Ok(Self {
            structured,
            ttl_secs,
            payload: payload.to_string(),
        })
    }

    /// Whether a record written at `written_at` is stale at `now`.
    pub fn is_expired(&self, written_at: SystemTime, now: SystemTime) -> bool {
        if self.ttl_secs == 0 {
            return false;
        }
        match written_at.checked_add(Duration::from_secs(self.ttl_secs)) {
            Some(deadline) => now > deadline,
            None => false,
        }
    }

    /// Decode the payload. A structured payload that fails to parse comes back
    /// as the raw scalar.
    pub fn into_value(self) -> CacheValue {
        if !self.structured {
            return CacheValue::Scalar(self.payload);
        }
        match serde_json::from_str::<Value>(&self.payload) {
            Ok(value) => CacheValue::Structured(value),
            Err(err) => {
                tracing::debug!(error = %err, "structured cache payload did not parse");
                CacheValue::Scalar(self.payload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_layout() {
        let entry = CacheEntry::from_value(&CacheValue::Structured(json!({"a": 1})), 60).unwrap();
        assert_eq!(entry.encode(), r#"1^60^{"a":1}"#);

        let entry = CacheEntry::from_value(&CacheValue::from("plain"), 0).unwrap();
        assert_eq!(entry.encode(), "0^0^plain");
    }

    #[test]
    fn test_payload_may_contain_delimiter() {
        let entry = CacheEntry::decode("0^5^a^b^c").unwrap();
        assert_eq!(entry.payload, "a^b^c");
        assert_eq!(entry.ttl_secs, 5);
        assert_eq!(entry.into_value(), CacheValue::from("a^b^c"));
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert_eq!(
            CacheEntry::decode("garbage"),
            Err(EntryDecodeError::MissingField("ttl"))
        );
        assert_eq!(
            CacheEntry::decode("1^10"),
            Err(EntryDecodeError::MissingField("payload"))
        );
        assert!(matches!(
            CacheEntry::decode("1^soon^{}"),
            Err(EntryDecodeError::InvalidTtl(_))
        ));
        assert!(matches!(
            CacheEntry::decode("x^1^{}"),
            Err(EntryDecodeError::InvalidFlag(_))
        ));
    }

    #[test]
    fn test_malformed_structured_payload_is_scalar() {
        let entry = CacheEntry::decode("1^0^{not json").unwrap();
        assert_eq!(entry.into_value(), CacheValue::from("{not json"));
    }

    #[test]
    fn test_expiry_window() {
        let entry = CacheEntry::decode("0^10^x").unwrap();
        let written = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        assert!(!entry.is_expired(written, written + Duration::from_secs(10)));
        assert!(entry.is_expired(written, written + Duration::from_secs(11)));

        let forever = CacheEntry::decode("0^0^x").unwrap();
        assert!(!forever.is_expired(written, written + Duration::from_secs(1_000_000)));
    }
}

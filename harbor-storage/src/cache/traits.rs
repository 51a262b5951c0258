//! Cache driver trait and the self-describing cache value.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use harbor_core::{HarborResult, Row};
use serde_json::Value;

/// A value held in a cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// Serialized structured value; decoded back to JSON on read.
    Structured(Value),
    /// Opaque scalar, stored and returned literally.
    Scalar(String),
}

impl CacheValue {
    pub fn is_structured(&self) -> bool {
        matches!(self, CacheValue::Structured(_))
    }

    /// The value as a row, if it is a structured mapping.
    pub fn as_row(&self) -> Option<&Row> {
        match self {
            CacheValue::Structured(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    pub fn into_row(self) -> Option<Row> {
        match self {
            CacheValue::Structured(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            CacheValue::Scalar(s) => Some(s),
            CacheValue::Structured(_) => None,
        }
    }
}

impl From<Row> for CacheValue {
    fn from(row: Row) -> Self {
        CacheValue::Structured(Value::Object(row))
    }
}

impl From<&str> for CacheValue {
    fn from(s: &str) -> Self {
        CacheValue::Scalar(s.to_string())
    }
}

impl From<String> for CacheValue {
    fn from(s: String) -> Self {
        CacheValue::Scalar(s)
    }
}

/// Uniform get/set/remove primitive with TTL semantics.
///
/// A miss (absent or expired) is `Ok(None)`, never an error. Malformed stored
/// payloads are returned as [`CacheValue::Scalar`] rather than failing the
/// read.
#[async_trait]
pub trait CacheDriver: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> HarborResult<Option<CacheValue>>;

    /// Write a value. `ttl_secs = None` uses the driver default; `Some(0)`
    /// never expires.
    async fn set(&self, key: &str, value: &CacheValue, ttl_secs: Option<u64>) -> HarborResult<()>;

    /// Delete a value, returning whether something was removed.
    async fn remove(&self, key: &str) -> HarborResult<bool>;

    /// Hit/miss counters for this driver instance.
    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (absent or expired).
    pub misses: u64,
    /// Number of entries dropped because they had expired.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free counters backing [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl StatCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn expired(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
        self.miss();
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

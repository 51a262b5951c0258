//! Error types for HARBOR operations

use crate::config::BackendKind;
use thiserror::Error;

/// Backend connection errors.
///
/// These are surfaced to the caller and never cached by the resource
/// registry: a corrected configuration can be retried under the same key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("{kind} backend at {target} is unreachable: {reason}")]
    Unreachable {
        kind: BackendKind,
        target: String,
        reason: String,
    },

    #[error("Authentication against {kind} backend at {target} failed: {reason}")]
    AuthFailed {
        kind: BackendKind,
        target: String,
        reason: String,
    },

    #[error("Connecting to {kind} backend at {target} timed out after {timeout_secs}s")]
    Timeout {
        kind: BackendKind,
        target: String,
        timeout_secs: u64,
    },

    #[error("Failed to select namespace {namespace} on {kind} backend: {reason}")]
    NamespaceSelect {
        kind: BackendKind,
        namespace: String,
        reason: String,
    },
}

/// Storage layer errors (persistence backend and cache drivers).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Query {operation} on {table} failed: {reason}")]
    QueryFailed {
        operation: String,
        table: String,
        reason: String,
    },

    #[error("Invalid SQL identifier: {name}")]
    InvalidIdentifier { name: String },

    #[error("Row for {table} has no primary key value in field {pk}")]
    MissingPrimaryKey { table: String, pk: String },

    #[error("Cache operation {operation} failed for key {key}: {reason}")]
    Cache {
        operation: String,
        key: String,
        reason: String,
    },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown configuration section: {name}")]
    UnknownSection { name: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Master error type for all HARBOR errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HarborError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },
}

impl HarborError {
    /// Build an I/O error tagged with the path it happened on.
    pub fn io(path: impl std::fmt::Display, err: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            reason: err.to_string(),
        }
    }

    /// True for backend connection failures.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<serde_json::Error> for HarborError {
    fn from(err: serde_json::Error) -> Self {
        HarborError::Storage(StorageError::Serialization {
            reason: err.to_string(),
        })
    }
}

/// Result type alias for HARBOR operations.
pub type HarborResult<T> = Result<T, HarborError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::Unreachable {
            kind: BackendKind::KeyValue,
            target: "127.0.0.1:6379".to_string(),
            reason: "connection refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("key-value"));
        assert!(msg.contains("127.0.0.1:6379"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_harbor_error_from_connection() {
        let err: HarborError = ConnectionError::Timeout {
            kind: BackendKind::Database,
            target: "db:5432".to_string(),
            timeout_secs: 3,
        }
        .into();
        assert!(err.is_connection());
        assert!(err.to_string().starts_with("Connection error"));
    }

    #[test]
    fn test_io_error_keeps_path() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = HarborError::io("/tmp/cache/abc", io);
        match err {
            HarborError::Io { path, reason } => {
                assert_eq!(path, "/tmp/cache/abc");
                assert!(reason.contains("gone"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_serde_error_maps_to_storage() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let Err(e) = parse else {
            panic!("expected parse failure");
        };
        let err: HarborError = e.into();
        assert!(matches!(
            err,
            HarborError::Storage(StorageError::Serialization { .. })
        ));
    }
}

//! HARBOR Core - Shared Types
//!
//! Errors, configuration maps and the fingerprinting used to key pooled
//! resources. Everything here is backend-agnostic; connectors and drivers
//! live in `harbor-storage`.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod record;

pub use config::{BackendKind, ConfigCatalog, ConfigMap, ConfigMapExt, ConfigSource};
pub use error::{ConfigError, ConnectionError, HarborError, HarborResult, StorageError};
pub use fingerprint::ConfigFingerprint;
pub use record::{RecordId, Row};

//! HARBOR API - HTTP surface and service wiring
//!
//! This crate puts the cache-aside store behind a small Axum router and
//! carries everything the running service needs around it: TOML settings,
//! the Postgres row store, structured logging, Prometheus metrics, and
//! throttled error reporting backed by a rolling file log.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod macros;
pub mod routes;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::Settings;
pub use db::{DbConfig, PgConnector, PgDatabase};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use extractors::{RecordPath, RequestContext};
pub use routes::{create_router, with_boundary};
pub use state::{AppState, EntityCatalog, RecordBackend};

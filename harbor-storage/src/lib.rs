//! HARBOR Storage - Pooled Resources, Cache Drivers, Cache-Aside Store
//!
//! - [`ResourceRegistry`] hands out at most one live connection per distinct
//!   configuration and call-site label.
//! - [`cache`] holds the [`CacheDriver`] abstraction with its file-backed and
//!   remote key-value variants.
//! - [`CacheAsideStore`] implements read-through loads, write-invalidate and
//!   key derivation on top of a [`RowStore`] and a key-value cache.

pub mod cache;
pub mod cache_aside;
pub mod entity;
pub mod registry;
pub mod rows;

pub use cache::{
    CacheDriver, CacheEntry, CacheStats, CacheValue, FileCache, KeyValueStore, RedisConnector,
    RedisStore, RemoteCache,
};
pub use cache_aside::{
    CacheAsideStore, LoadSource, Loaded, NamespaceOptions, SaveMode, SaveOutcome, CACHE_LABEL,
    ROWS_LABEL,
};
pub use entity::{EntityDef, FieldHook, FieldOutcome, InsertHook, EXTEND_FIELD};
pub use registry::{Connector, IdentityOptions, Namespaced, Pooled, ResourceRegistry};
pub use rows::{validate_identifier, RowStore};

//! Cache drivers.
//!
//! Every driver offers the same three primitives ([`CacheDriver`]): `get`,
//! `set` with a TTL in seconds (`0` = never expires) and `remove`. Values are
//! self-describing: a [`CacheValue`] is either a structured JSON value or an
//! opaque scalar string.
//!
//! - [`FileCache`] keeps one `flag^ttl^payload` record per key on disk and
//!   expires entries lazily on read.
//! - [`RemoteCache`] delegates storage and expiry to a remote key-value store
//!   through the explicit [`KeyValueStore`] interface; [`RedisStore`] is the
//!   production implementation.

pub mod entry;
pub mod file_backend;
pub mod redis_backend;
pub mod remote;
pub mod traits;

pub use entry::{CacheEntry, EntryDecodeError, FIELD_DELIMITER};
pub use file_backend::FileCache;
pub use redis_backend::{RedisConnector, RedisStore};
pub use remote::{KeyValueStore, RemoteCache};
pub use traits::{CacheDriver, CacheStats, CacheValue};

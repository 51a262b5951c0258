//! Remote key-value cache driver.

use std::sync::Arc;

use async_trait::async_trait;
use harbor_core::{ConfigMapExt, HarborResult};
use serde_json::Value;

use super::traits::{CacheDriver, CacheStats, CacheValue, StatCounters};
use crate::registry::Pooled;

/// Operations a remote key-value server must provide.
///
/// Anything beyond this list is not reachable through the cache layer.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> HarborResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> HarborResult<()>;

    /// Set with an expiry in seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> HarborResult<()>;

    /// Delete a key, returning whether it existed.
    async fn delete(&self, key: &str) -> HarborResult<bool>;

    /// Switch the selected database.
    async fn select(&self, db: i64) -> HarborResult<()>;

    /// Set an expiry on an existing key, returning whether the key existed.
    async fn expire(&self, key: &str, ttl_secs: u64) -> HarborResult<bool>;

    async fn ping(&self) -> HarborResult<()>;
}

macro_rules! forward_key_value_store {
    ($($ty:ty),*) => {$(
        #[async_trait]
        impl<S: KeyValueStore + ?Sized> KeyValueStore for $ty {
            async fn get(&self, key: &str) -> HarborResult<Option<String>> {
                (**self).get(key).await
            }
            async fn set(&self, key: &str, value: &str) -> HarborResult<()> {
                (**self).set(key, value).await
            }
            async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> HarborResult<()> {
                (**self).set_ex(key, value, ttl_secs).await
            }
            async fn delete(&self, key: &str) -> HarborResult<bool> {
                (**self).delete(key).await
            }
            async fn select(&self, db: i64) -> HarborResult<()> {
                (**self).select(db).await
            }
            async fn expire(&self, key: &str, ttl_secs: u64) -> HarborResult<bool> {
                (**self).expire(key, ttl_secs).await
            }
            async fn ping(&self) -> HarborResult<()> {
                (**self).ping().await
            }
        }
    )*};
}

forward_key_value_store!(Arc<S>, Box<S>);

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for Pooled<S> {
    async fn get(&self, key: &str) -> HarborResult<Option<String>> {
        self.handle().get(key).await
    }
    async fn set(&self, key: &str, value: &str) -> HarborResult<()> {
        self.handle().set(key, value).await
    }
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> HarborResult<()> {
        self.handle().set_ex(key, value, ttl_secs).await
    }
    async fn delete(&self, key: &str) -> HarborResult<bool> {
        self.handle().delete(key).await
    }
    async fn select(&self, db: i64) -> HarborResult<()> {
        self.handle().select(db).await
    }
    async fn expire(&self, key: &str, ttl_secs: u64) -> HarborResult<bool> {
        self.handle().expire(key, ttl_secs).await
    }
    async fn ping(&self) -> HarborResult<()> {
        self.handle().ping().await
    }
}

/// Cache driver over a [`KeyValueStore`]; expiry is the server's job.
///
/// Structured values are stored JSON-encoded and scalars literally. On read,
/// a payload that decodes to a JSON object or array comes back structured;
/// anything else is returned as the raw scalar.
pub struct RemoteCache<S> {
    store: S,
    default_ttl: u64,
    stats: StatCounters,
}

impl<S: KeyValueStore> RemoteCache<S> {
    pub fn new(store: S, default_ttl: u64) -> Self {
        Self {
            store,
            default_ttl,
            stats: StatCounters::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }
}

impl<T: KeyValueStore> RemoteCache<Arc<Pooled<T>>> {
    /// Wrap a registry connection, taking the default TTL from its `ttl` key.
    pub fn from_pooled(pooled: Arc<Pooled<T>>) -> Self {
        let ttl = pooled.config().get_u64("ttl").unwrap_or(0);
        Self::new(pooled, ttl)
    }
}

fn decode_payload(raw: String) -> CacheValue {
    match serde_json::from_str::<Value>(&raw) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => CacheValue::Structured(value),
        _ => CacheValue::Scalar(raw),
    }
}

#[async_trait]
impl<S: KeyValueStore> CacheDriver for RemoteCache<S> {
    async fn get(&self, key: &str) -> HarborResult<Option<CacheValue>> {
        match self.store.get(key).await? {
            Some(raw) => {
                self.stats.hit();
                Ok(Some(decode_payload(raw)))
            }
            None => {
                self.stats.miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl_secs: Option<u64>) -> HarborResult<()> {
        let payload = match value {
            CacheValue::Structured(v) => serde_json::to_string(v)?,
            CacheValue::Scalar(s) => s.clone(),
        };
        match ttl_secs.unwrap_or(self.default_ttl) {
            0 => self.store.set(key, &payload).await,
            ttl => self.store.set_ex(key, &payload, ttl).await,
        }
    }

    async fn remove(&self, key: &str) -> HarborResult<bool> {
        self.store.delete(key).await
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        data: Mutex<HashMap<String, String>>,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingStore {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl KeyValueStore for RecordingStore {
        async fn get(&self, key: &str) -> HarborResult<Option<String>> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }
        async fn set(&self, key: &str, value: &str) -> HarborResult<()> {
            self.calls.lock().unwrap().push(format!("SET {key}"));
            self.data
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }
        async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> HarborResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("SETEX {key} {ttl_secs}"));
            self.data
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }
        async fn delete(&self, key: &str) -> HarborResult<bool> {
            Ok(self.data.lock().unwrap().remove(key).is_some())
        }
        async fn select(&self, _db: i64) -> HarborResult<()> {
            Ok(())
        }
        async fn expire(&self, key: &str, _ttl_secs: u64) -> HarborResult<bool> {
            Ok(self.data.lock().unwrap().contains_key(key))
        }
        async fn ping(&self) -> HarborResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_ttl_selects_command() {
        let cache = RemoteCache::new(Arc::new(RecordingStore::default()), 0);
        let value = CacheValue::from("v");
        cache.set("a", &value, None).await.unwrap();
        cache.set("b", &value, Some(0)).await.unwrap();
        cache.set("c", &value, Some(30)).await.unwrap();

        assert_eq!(cache.store().calls(), vec!["SET a", "SET b", "SETEX c 30"]);

        let with_default = RemoteCache::new(Arc::new(RecordingStore::default()), 120);
        with_default.set("d", &value, None).await.unwrap();
        assert_eq!(with_default.store().calls(), vec!["SETEX d 120"]);
    }

    #[tokio::test]
    async fn test_opportunistic_decode() {
        let cache = RemoteCache::new(RecordingStore::default(), 0);
        let row = CacheValue::Structured(json!({"id": 1, "tags": ["a"]}));
        cache.set("row", &row, None).await.unwrap();
        cache.set("num", &CacheValue::from("42"), None).await.unwrap();
        cache.set("text", &CacheValue::from("{half"), None).await.unwrap();

        assert_eq!(cache.get("row").await.unwrap(), Some(row));
        assert_eq!(cache.get("num").await.unwrap(), Some(CacheValue::from("42")));
        assert_eq!(
            cache.get("text").await.unwrap(),
            Some(CacheValue::from("{half"))
        );
        assert_eq!(cache.get("missing").await.unwrap(), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_remove_and_default_ttl_from_pool() {
        let mut config = harbor_core::ConfigMap::new();
        config.insert("ttl".to_string(), json!(45));
        let pooled = Arc::new(Pooled::new(RecordingStore::default(), config));
        let cache = RemoteCache::from_pooled(pooled);
        assert_eq!(cache.default_ttl(), 45);

        cache.set("k", &CacheValue::from("v"), None).await.unwrap();
        assert!(cache.remove("k").await.unwrap());
        assert!(!cache.remove("k").await.unwrap());
    }
}

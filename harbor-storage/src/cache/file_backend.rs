//! File-backed cache driver.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use harbor_core::{HarborError, HarborResult, StorageError};
use sha2::{Digest, Sha256};

use super::entry::CacheEntry;
use super::traits::{CacheDriver, CacheStats, CacheValue, StatCounters};

/// Cache storing one file per key under a directory.
///
/// File names are the hex SHA-256 of the key. Expiry is lazy: an expired
/// record is deleted by the read that notices it. Writes go to a temporary
/// file in the same directory and are renamed into place, so readers never
/// observe a partially written record.
#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    default_ttl: u64,
    stats: StatCounters,
}

impl FileCache {
    /// Create a cache rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>, default_ttl: u64) -> Self {
        Self {
            dir: dir.into(),
            default_ttl,
            stats: StatCounters::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    /// Path of the record holding `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(hex::encode(digest))
    }

    async fn discard(&self, path: &Path) -> HarborResult<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(HarborError::io(path.display(), e)),
        }
    }
}

fn write_atomically(dir: &Path, path: &Path, contents: &[u8]) -> HarborResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| HarborError::io(dir.display(), e))?;
    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| HarborError::io(dir.display(), e))?;
    tmp.write_all(contents)
        .map_err(|e| HarborError::io(tmp.path().display(), e))?;
    tmp.persist(path)
        .map_err(|e| HarborError::io(path.display(), e.error))?;
    Ok(())
}

#[async_trait]
impl CacheDriver for FileCache {
    async fn get(&self, key: &str) -> HarborResult<Option<CacheValue>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.stats.miss();
                return Ok(None);
            }
            Err(e) => return Err(HarborError::io(path.display(), e)),
        };
        let raw = match String::from_utf8(bytes) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(key, error = %err, "discarding non-UTF-8 cache record");
                self.stats.miss();
                return Ok(None);
            }
        };

        let entry = match CacheEntry::decode(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(key, error = %err, "discarding unreadable cache record");
                self.stats.miss();
                return Ok(None);
            }
        };

        if entry.ttl_secs > 0 {
            let written_at = tokio::fs::metadata(&path)
                .await
                .and_then(|meta| meta.modified())
                .map_err(|e| HarborError::io(path.display(), e))?;
            if entry.is_expired(written_at, SystemTime::now()) {
                self.discard(&path).await?;
                self.stats.expired();
                return Ok(None);
            }
        }

        self.stats.hit();
        Ok(Some(entry.into_value()))
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl_secs: Option<u64>) -> HarborResult<()> {
        let entry = CacheEntry::from_value(value, ttl_secs.unwrap_or(self.default_ttl))?;
        let contents = entry.encode().into_bytes();
        let dir = self.dir.clone();
        let path = self.path_for(key);

        tokio::task::spawn_blocking(move || write_atomically(&dir, &path, &contents))
            .await
            .map_err(|e| StorageError::Cache {
                operation: "set".to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })?
    }

    async fn remove(&self, key: &str) -> HarborResult<bool> {
        self.discard(&self.path_for(key)).await
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn backdate(path: &Path, secs: u64) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs))
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_get_structured_and_scalar() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("cache"), 0);

        let row = CacheValue::Structured(json!({"id": 7, "name": "x"}));
        cache.set("user-7", &row, None).await.unwrap();
        cache.set("greeting", &CacheValue::from("hi^there"), None).await.unwrap();

        assert_eq!(cache.get("user-7").await.unwrap(), Some(row));
        assert_eq!(
            cache.get("greeting").await.unwrap(),
            Some(CacheValue::from("hi^there"))
        );
        assert_eq!(cache.get("absent").await.unwrap(), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_file_name_is_key_digest() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path(), 0);
        cache.set("k", &CacheValue::from("v"), None).await.unwrap();

        let expected = hex::encode(Sha256::digest(b"k"));
        let raw = std::fs::read_to_string(dir.path().join(expected)).unwrap();
        assert_eq!(raw, "0^0^v");
    }

    #[tokio::test]
    async fn test_expired_record_is_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path(), 0);
        cache.set("k", &CacheValue::from("v"), Some(10)).await.unwrap();
        let path = cache.path_for("k");

        backdate(&path, 5);
        assert_eq!(cache.get("k").await.unwrap(), Some(CacheValue::from("v")));

        backdate(&path, 11);
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!path.exists());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path(), 30);
        cache.set("k", &CacheValue::from("v"), Some(0)).await.unwrap();
        backdate(&cache.path_for("k"), 86_400 * 365);
        assert_eq!(cache.get("k").await.unwrap(), Some(CacheValue::from("v")));
    }

    #[tokio::test]
    async fn test_default_ttl_applies() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path(), 30);
        cache.set("k", &CacheValue::from("v"), None).await.unwrap();
        let raw = std::fs::read_to_string(cache.path_for("k")).unwrap();
        assert!(raw.starts_with("0^30^"));
    }

    #[tokio::test]
    async fn test_unreadable_records_are_misses_or_raw() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path(), 0);

        std::fs::write(cache.path_for("no-delims"), "just text").unwrap();
        assert_eq!(cache.get("no-delims").await.unwrap(), None);

        std::fs::write(cache.path_for("bad-json"), "1^0^{oops").unwrap();
        assert_eq!(
            cache.get("bad-json").await.unwrap(),
            Some(CacheValue::from("{oops"))
        );

        std::fs::write(cache.path_for("binary"), [b'0', b'^', b'0', b'^', 0xff, 0xfe]).unwrap();
        assert_eq!(cache.get("binary").await.unwrap(), None);
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path(), 0);
        cache.set("k", &CacheValue::from("v"), None).await.unwrap();
        assert!(cache.remove("k").await.unwrap());
        assert!(!cache.remove("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}

//! File-backed cache behaviour against a real directory.

use std::time::Duration;

use harbor_storage::{CacheDriver, CacheValue, FileCache};
use serde_json::json;

#[tokio::test]
async fn test_one_second_ttl_expires_and_deletes_file() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FileCache::new(dir.path().join("cache"), 0);
    let value = CacheValue::Structured(json!({"id": 1}));

    cache.set("short", &value, Some(1)).await.unwrap();
    assert_eq!(cache.get("short").await.unwrap(), Some(value));

    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert_eq!(cache.get("short").await.unwrap(), None);
    assert!(!cache.path_for("short").exists());
}

#[tokio::test]
async fn test_concurrent_writers_never_tear_records() {
    let dir = tempfile::tempdir().unwrap();
    let cache = std::sync::Arc::new(FileCache::new(dir.path(), 0));

    let mut tasks = Vec::new();
    for i in 0..16 {
        let cache = std::sync::Arc::clone(&cache);
        tasks.push(tokio::spawn(async move {
            let payload = CacheValue::Structured(json!({"writer": i, "pad": "x".repeat(4096)}));
            cache.set("contended", &payload, None).await.unwrap();
            cache.get("contended").await.unwrap()
        }));
    }

    for task in tasks {
        let seen = task.await.unwrap().unwrap();
        assert!(seen.as_row().is_some(), "torn record: {seen:?}");
    }
}

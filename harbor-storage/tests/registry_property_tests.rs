//! Property-Based Tests for Connection Identity
//!
//! **Property: Connection Identity**
//!
//! For any configuration, acquiring twice under the same label SHALL return
//! the same connection instance, AND acquiring under another label SHALL
//! build a distinct one. Keys the backend does not recognize SHALL NOT affect
//! identity.

use std::sync::Arc;

use harbor_core::{ConfigFingerprint, ConfigSource};
use harbor_storage::{IdentityOptions, KeyValueStore, ResourceRegistry};
use harbor_test_utils::assertions::{assert_config_error, assert_connection_error};
use harbor_test_utils::generators::{arb_kv_config, arb_noise_key};
use harbor_test_utils::*;
use proptest::prelude::*;
use serde_json::json;
use tokio::runtime::Runtime;

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn kv_registry() -> ResourceRegistry<MockKvConnector> {
    ResourceRegistry::new(
        MockKvConnector::new(MockKvServer::new()),
        Arc::new(fixtures::catalog()),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_same_label_same_instance(config in arb_kv_config()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let registry = kv_registry();
            let source = ConfigSource::Inline(config);

            let first = registry.acquire(&source, "a", IdentityOptions::default()).await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let second = registry.acquire(&source, "a", IdentityOptions::default()).await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let other = registry.acquire(&source, "b", IdentityOptions::default()).await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            prop_assert!(Arc::ptr_eq(&first, &second));
            prop_assert!(!Arc::ptr_eq(&first, &other));
            prop_assert_eq!(registry.connector().builds(), 2);
            prop_assert_eq!(registry.len(), 2);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_unrecognized_keys_do_not_change_identity(
        config in arb_kv_config(),
        noise in arb_noise_key(),
        value in any::<i64>(),
    ) {
        let mut noisy = config.clone();
        noisy.insert(noise, json!(value));
        // Case of recognized keys does not matter either.
        if let Some(host) = noisy.remove("host") {
            noisy.insert("HOST".to_string(), host);
        }

        prop_assert_eq!(
            ConfigFingerprint::of(BackendKind::KeyValue, &config),
            ConfigFingerprint::of(BackendKind::KeyValue, &noisy)
        );

        let registry = kv_registry();
        let plain_key = registry
            .key_for(&ConfigSource::Inline(config), "x", IdentityOptions::default())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let noisy_key = registry
            .key_for(&ConfigSource::Inline(noisy), "x", IdentityOptions::default())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(plain_key, noisy_key);
    }

    #[test]
    fn prop_relevant_difference_changes_identity(config in arb_kv_config(), bump in 1u64..1000) {
        let mut changed = config.clone();
        let ttl = config.get("ttl").and_then(|v| v.as_u64()).unwrap_or(0);
        changed.insert("ttl".to_string(), json!(ttl + bump));

        prop_assert_ne!(
            ConfigFingerprint::of(BackendKind::KeyValue, &config),
            ConfigFingerprint::of(BackendKind::KeyValue, &changed)
        );
    }
}

#[tokio::test]
async fn test_ignore_namespace_reselects_caller_db() {
    let registry = kv_registry();
    let mut config = fixtures::catalog().get("redis").cloned().unwrap();

    config.insert("db".to_string(), json!(1));
    let first = registry
        .acquire(&ConfigSource::Inline(config.clone()), "shared", IdentityOptions::ignore_namespace())
        .await
        .unwrap();
    assert_eq!(first.selected(), 1);

    config.insert("db".to_string(), json!(4));
    let second = registry
        .acquire(&ConfigSource::Inline(config), "shared", IdentityOptions::ignore_namespace())
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.selected(), 4);
    assert_eq!(registry.connector().builds(), 1);
}

#[tokio::test]
async fn test_failed_construction_is_retried() {
    let registry = kv_registry();
    let source = ConfigSource::from("redis");

    registry.connector().fail_next();
    let failed = registry
        .acquire(&source, "retry", IdentityOptions::default())
        .await;
    assert_connection_error(&failed);
    assert!(registry.is_empty());

    let conn = registry
        .acquire(&source, "retry", IdentityOptions::default())
        .await
        .unwrap();
    conn.ping().await.unwrap();
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_unknown_named_section() {
    let registry = kv_registry();
    let result = registry
        .acquire(&ConfigSource::from("memcache"), "x", IdentityOptions::default())
        .await;
    assert_config_error(&result);
}

#[tokio::test]
async fn test_close_drops_connections() {
    let registry = kv_registry();
    let source = ConfigSource::from("redis");
    registry
        .acquire(&source, "a", IdentityOptions::default())
        .await
        .unwrap();
    assert_eq!(registry.len(), 1);

    registry.close();
    assert!(registry.is_empty());

    registry
        .acquire(&source, "a", IdentityOptions::default())
        .await
        .unwrap();
    assert_eq!(registry.connector().builds(), 2);
}

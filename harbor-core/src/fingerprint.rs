//! Stable identity for connection configurations.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::config::{BackendKind, ConfigMap};

/// Field separator fed to the hasher between a key and its value.
const KEY_SEPARATOR: u8 = 0x1f;
/// Record separator fed to the hasher after each key/value pair.
const PAIR_SEPARATOR: u8 = 0x1e;

/// Deterministic digest of a normalized configuration map.
///
/// Two maps that agree on every key the backend recognizes (ignoring key case
/// and ordering) produce the same fingerprint. Unrecognized keys never
/// influence it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigFingerprint(String);

impl ConfigFingerprint {
    /// Fingerprint a raw map for the given backend kind.
    pub fn of(kind: BackendKind, raw: &ConfigMap) -> Self {
        Self::of_normalized(&kind.normalize(raw), None)
    }

    /// Fingerprint a raw map, leaving the namespace key out of the identity.
    pub fn of_without(kind: BackendKind, raw: &ConfigMap) -> Self {
        Self::of_normalized(&kind.normalize(raw), Some(kind.namespace_key()))
    }

    /// Fingerprint an already-normalized map, optionally skipping one key.
    pub fn of_normalized(normalized: &ConfigMap, exclude: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        for (key, value) in normalized {
            if exclude == Some(key.as_str()) {
                continue;
            }
            hasher.update(key.as_bytes());
            hasher.update([KEY_SEPARATOR]);
            hasher.update(value.to_string().as_bytes());
            hasher.update([PAIR_SEPARATOR]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Lowercase hex form of the digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn map(pairs: &[(&str, Value)]) -> ConfigMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_key_case_and_order_do_not_matter() {
        let a = map(&[("Host", json!("db1")), ("PORT", json!(5433))]);
        let b = map(&[("port", json!(5433)), ("host", json!("db1"))]);
        assert_eq!(
            ConfigFingerprint::of(BackendKind::Database, &a),
            ConfigFingerprint::of(BackendKind::Database, &b)
        );
    }

    #[test]
    fn test_unrecognized_keys_ignored() {
        let a = map(&[("host", json!("db1"))]);
        let b = map(&[("host", json!("db1")), ("comment", json!("primary"))]);
        assert_eq!(
            ConfigFingerprint::of(BackendKind::Database, &a),
            ConfigFingerprint::of(BackendKind::Database, &b)
        );
    }

    #[test]
    fn test_explicit_default_equals_missing() {
        let a = map(&[("host", json!("127.0.0.1"))]);
        let b = map(&[("host", json!("127.0.0.1")), ("port", json!(6379))]);
        assert_eq!(
            ConfigFingerprint::of(BackendKind::KeyValue, &a),
            ConfigFingerprint::of(BackendKind::KeyValue, &b)
        );
    }

    #[test]
    fn test_relevant_value_changes_fingerprint() {
        let a = map(&[("host", json!("db1"))]);
        let b = map(&[("host", json!("db2"))]);
        assert_ne!(
            ConfigFingerprint::of(BackendKind::Database, &a),
            ConfigFingerprint::of(BackendKind::Database, &b)
        );
    }

    #[test]
    fn test_namespace_exclusion() {
        let a = map(&[("dbname", json!("shop"))]);
        let b = map(&[("dbname", json!("billing"))]);
        assert_ne!(
            ConfigFingerprint::of(BackendKind::Database, &a),
            ConfigFingerprint::of(BackendKind::Database, &b)
        );
        assert_eq!(
            ConfigFingerprint::of_without(BackendKind::Database, &a),
            ConfigFingerprint::of_without(BackendKind::Database, &b)
        );
    }

    #[test]
    fn test_hex_digest_shape() {
        let fp = ConfigFingerprint::of(BackendKind::KeyValue, &ConfigMap::new());
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.to_string(), fp.as_str());
    }

    fn relevant_db_config() -> impl Strategy<Value = ConfigMap> {
        (
            "[a-z]{1,12}(\\.[a-z]{1,8})?",
            1u16..65535,
            "[a-z_]{1,10}",
            "[A-Za-z0-9]{0,12}",
            "[a-z_]{1,12}",
        )
            .prop_map(|(host, port, user, password, dbname)| {
                map(&[
                    ("host", json!(host)),
                    ("port", json!(port)),
                    ("username", json!(user)),
                    ("password", json!(password)),
                    ("dbname", json!(dbname)),
                ])
            })
    }

    fn upper_case_keys(m: &ConfigMap) -> ConfigMap {
        m.iter()
            .map(|(k, v)| (k.to_uppercase(), v.clone()))
            .collect()
    }

    proptest! {
        #[test]
        fn prop_equal_relevant_config_same_fingerprint(
            config in relevant_db_config(),
            noise_key in "x_[a-z]{1,8}",
            noise_value in any::<i64>(),
        ) {
            let mut noisy = upper_case_keys(&config);
            noisy.insert(noise_key, json!(noise_value));
            prop_assert_eq!(
                ConfigFingerprint::of(BackendKind::Database, &config),
                ConfigFingerprint::of(BackendKind::Database, &noisy)
            );
        }

        #[test]
        fn prop_different_relevant_config_different_fingerprint(
            a in relevant_db_config(),
            b in relevant_db_config(),
        ) {
            let na = BackendKind::Database.normalize(&a);
            let nb = BackendKind::Database.normalize(&b);
            prop_assume!(na != nb);
            prop_assert_ne!(
                ConfigFingerprint::of(BackendKind::Database, &a),
                ConfigFingerprint::of(BackendKind::Database, &b)
            );
        }
    }
}

//! Configuration maps for pooled backends.
//!
//! A connection is described by a flat map of scalar settings. Before a map is
//! used for identity or for connecting it is normalized against the backend
//! kind: key names are lower-cased, missing recognized keys are filled from the
//! kind's defaults and everything the backend does not recognize is dropped.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ConfigError;

/// Flat, ordered configuration map. Ordering makes serialization canonical.
pub type ConfigMap = BTreeMap<String, Value>;

/// The kind of backend a pooled connection talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// SQL engine.
    Database,
    /// Remote key-value store with native expiring keys.
    KeyValue,
}

const DATABASE_KEYS: &[&str] = &["host", "port", "username", "password", "dbname", "charset"];
const KEY_VALUE_KEYS: &[&str] = &["persistent", "host", "port", "timeout", "ttl", "password", "db"];

impl BackendKind {
    /// Keys that participate in connection identity and construction.
    pub fn recognized_keys(&self) -> &'static [&'static str] {
        match self {
            BackendKind::Database => DATABASE_KEYS,
            BackendKind::KeyValue => KEY_VALUE_KEYS,
        }
    }

    /// Key naming the selected database / namespace.
    pub fn namespace_key(&self) -> &'static str {
        match self {
            BackendKind::Database => "dbname",
            BackendKind::KeyValue => "db",
        }
    }

    /// Default values merged under a caller's configuration.
    pub fn defaults(&self) -> ConfigMap {
        let pairs = match self {
            BackendKind::Database => vec![
                ("host", json!("127.0.0.1")),
                ("port", json!(5432)),
                ("username", json!("postgres")),
                ("password", json!("")),
                ("dbname", json!("harbor")),
                ("charset", json!("utf8")),
            ],
            BackendKind::KeyValue => vec![
                ("persistent", json!(true)),
                ("host", json!("127.0.0.1")),
                ("port", json!(6379)),
                ("timeout", json!(3)),
                ("ttl", json!(0)),
                ("db", json!(0)),
            ],
        };
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    /// Normalize a raw map: lower-case keys, fill defaults, drop unknown keys.
    pub fn normalize(&self, raw: &ConfigMap) -> ConfigMap {
        let recognized = self.recognized_keys();
        let mut normalized = self.defaults();
        for (key, value) in raw {
            let key = key.to_lowercase();
            if recognized.contains(&key.as_str()) {
                normalized.insert(key, value.clone());
            }
        }
        normalized
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Database => write!(f, "database"),
            BackendKind::KeyValue => write!(f, "key-value"),
        }
    }
}

/// Where a connection's configuration comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// A section of the settings connection catalog (e.g. `"db"`, `"redis"`).
    Named(String),
    /// A configuration map supplied directly by the caller.
    Inline(ConfigMap),
}

impl From<&str> for ConfigSource {
    fn from(name: &str) -> Self {
        ConfigSource::Named(name.to_string())
    }
}

impl From<ConfigMap> for ConfigSource {
    fn from(map: ConfigMap) -> Self {
        ConfigSource::Inline(map)
    }
}

/// Named connection sections, as loaded from the settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigCatalog {
    sections: BTreeMap<String, ConfigMap>,
}

impl ConfigCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style section registration.
    pub fn with_section(mut self, name: &str, map: ConfigMap) -> Self {
        self.insert(name, map);
        self
    }

    pub fn insert(&mut self, name: &str, map: ConfigMap) {
        self.sections.insert(name.to_lowercase(), map);
    }

    /// Section lookup is case-insensitive on the section name.
    pub fn get(&self, name: &str) -> Option<&ConfigMap> {
        self.sections.get(&name.to_lowercase())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Turn a source into a concrete (not yet normalized) map.
    pub fn resolve(&self, source: &ConfigSource) -> Result<ConfigMap, ConfigError> {
        match source {
            ConfigSource::Inline(map) => Ok(map.clone()),
            ConfigSource::Named(name) => {
                self.get(name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownSection { name: name.clone() })
            }
        }
    }
}

/// Typed accessors over loosely-typed settings values.
///
/// Values loaded from files or the environment may arrive as strings, so the
/// numeric and boolean readers accept their textual forms as well.
pub trait ConfigMapExt {
    fn get_str(&self, key: &str) -> Option<String>;
    fn get_u64(&self, key: &str) -> Option<u64>;
    fn get_bool(&self, key: &str) -> Option<bool>;
}

impl ConfigMapExt for ConfigMap {
    fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(u64::from(*b)),
            _ => None,
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|v| v != 0),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

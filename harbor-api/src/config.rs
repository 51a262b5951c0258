//! Settings Module
//!
//! Settings are read from a TOML file (`HARBOR_CONFIG`, default
//! `config/harbor.toml`) and then overridden from environment variables.
//! Every section has defaults, so an empty file is a valid development setup.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use harbor_core::{ConfigCatalog, ConfigError, ConfigMap, ConfigMapExt, ConfigSource, HarborResult};
use harbor_storage::EntityDef;
use serde::Deserialize;

/// Default settings file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/harbor.toml";

// ============================================================================
// SECTIONS
// ============================================================================

/// `[server]`: listener and runtime sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Worker threads of the Tokio runtime.
    pub workers: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9505,
            workers: 10,
        }
    }
}

/// `[log]`: tracing filter level and the rolling log directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub path: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            path: PathBuf::from("logs"),
        }
    }
}

/// `[alert]`: throttle window and the shared check document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub window_minutes: u64,
    /// Defaults to `alert_check.json` under the log directory.
    pub check_file: Option<PathBuf>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            window_minutes: 5,
            check_file: None,
        }
    }
}

/// `[cache]`: local file cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub path: PathBuf,
    /// Seconds; 0 means entries never expire.
    pub default_ttl: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cache"),
            default_ttl: 0,
        }
    }
}

/// `[database]`: pool sizing for Postgres connections.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub pool_size: usize,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            pool_size: 16,
            connect_timeout_secs: 5,
        }
    }
}

/// One `[[entities]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct EntitySettings {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub pk: Option<String>,
    /// Database name used in cache keys. Defaults to the `dbname` of the
    /// entity's database connection.
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_db_connection")]
    pub db_connection: String,
    #[serde(default = "default_cache_connection")]
    pub cache_connection: String,
}

fn default_db_connection() -> String {
    "db".to_string()
}

fn default_cache_connection() -> String {
    "redis".to_string()
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Process-wide settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Prefix prepended to every entity table name.
    pub db_prefix: String,
    pub server: ServerSettings,
    pub log: LogSettings,
    pub alert: AlertSettings,
    pub cache: CacheSettings,
    pub database: DatabaseSettings,
    /// Named connection sections (`[connections.db]`, `[connections.redis]`).
    pub connections: BTreeMap<String, ConfigMap>,
    pub entities: Vec<EntitySettings>,
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml(raw: &str, origin: &str) -> HarborResult<Self> {
        toml::from_str(raw).map_err(|e| {
            ConfigError::Parse {
                path: origin.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> HarborResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| harbor_core::HarborError::io(path.display(), e))?;
        Self::from_toml(&raw, &path.display().to_string())
    }

    /// Load settings the way the server does at startup.
    ///
    /// Environment variables:
    /// - `HARBOR_CONFIG`: settings file (default: `config/harbor.toml`; a
    ///   missing default file falls back to built-in defaults)
    /// - `HARBOR_BIND`: listen host
    /// - `PORT`: listen port
    /// - `HARBOR_WORKERS`: runtime worker threads
    /// - `HARBOR_LOG_PATH`: rolling log directory
    pub fn from_env() -> HarborResult<Self> {
        let mut settings = match std::env::var("HARBOR_CONFIG") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::load(default)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Apply overrides from a variable lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> HarborResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HARBOR_BIND").filter(|h| !h.trim().is_empty()) {
            self.server.host = host.trim().to_string();
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "PORT".to_string(),
                value: port.clone(),
                reason: "expected a port number".to_string(),
            })?;
        }
        if let Some(workers) = lookup("HARBOR_WORKERS") {
            self.server.workers = workers.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "HARBOR_WORKERS".to_string(),
                value: workers.clone(),
                reason: "expected a thread count".to_string(),
            })?;
        }
        if let Some(path) = lookup("HARBOR_LOG_PATH").filter(|p| !p.trim().is_empty()) {
            self.log.path = PathBuf::from(path.trim());
        }
        if self.server.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.workers".to_string(),
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Socket address to bind.
    pub fn bind_addr(&self) -> HarborResult<SocketAddr> {
        let raw = format!("{}:{}", self.server.host, self.server.port);
        raw.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "server.host".to_string(),
                value: raw.clone(),
                reason: "expected an IP address".to_string(),
            }
            .into()
        })
    }

    /// Path of the shared alert check document.
    pub fn alert_check_file(&self) -> PathBuf {
        self.alert
            .check_file
            .clone()
            .unwrap_or_else(|| self.log.path.join("alert_check.json"))
    }

    /// Connection catalog handed to the registries.
    pub fn catalog(&self) -> ConfigCatalog {
        let mut catalog = ConfigCatalog::new();
        for (name, map) in &self.connections {
            catalog.insert(name, map.clone());
        }
        catalog
    }

    /// Entity definitions, with the default `extend` hook registered.
    pub fn entity_defs(&self) -> Vec<EntityDef> {
        let catalog = self.catalog();
        self.entities
            .iter()
            .map(|entry| {
                let database = entry.database.clone().unwrap_or_else(|| {
                    catalog
                        .get(&entry.db_connection)
                        .and_then(|section| section.get_str("dbname"))
                        .unwrap_or_else(|| "harbor".to_string())
                });
                let mut def = EntityDef::new(entry.name.as_str(), &self.db_prefix, database)
                    .with_db_source(ConfigSource::Named(entry.db_connection.clone()))
                    .with_cache_source(ConfigSource::Named(entry.cache_connection.clone()));
                if let Some(table) = &entry.table {
                    def = def.with_table(format!("{}{}", self.db_prefix, table));
                }
                if let Some(pk) = &entry.pk {
                    def = def.with_pk(pk.as_str());
                }
                def
            })
            .collect()
    }
}

//! Redis implementation of [`KeyValueStore`] and its registry connector.

use std::time::Duration;

use async_trait::async_trait;
use harbor_core::{
    BackendKind, ConfigMap, ConfigMapExt, ConnectionError, HarborError, HarborResult,
    StorageError,
};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde_json::Value;
use tokio::time::timeout;

use super::remote::KeyValueStore;
use crate::registry::{Connector, Namespaced};

const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// A managed Redis connection.
///
/// The manager reconnects after the server goes away. Every reconnect
/// authenticates and selects the database named in the configuration, so a
/// runtime `SELECT` only lasts until the next reconnect.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    target: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

fn cache_error(operation: &str, key: &str, err: redis::RedisError) -> HarborError {
    StorageError::Cache {
        operation: operation.to_string(),
        key: key.to_string(),
        reason: err.to_string(),
    }
    .into()
}

/// Address, credentials and database for a normalized key-value config.
fn connection_info(config: &ConfigMap) -> HarborResult<ConnectionInfo> {
    let host = config
        .get_str("host")
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = config
        .get_u64("port")
        .and_then(|port| u16::try_from(port).ok())
        .unwrap_or(6379);
    let namespace = config.get("db").cloned().unwrap_or_else(|| Value::from(0));
    let db = namespace_index(&namespace).ok_or_else(|| ConnectionError::NamespaceSelect {
        kind: BackendKind::KeyValue,
        namespace: namespace.to_string(),
        reason: "database index must be an integer".to_string(),
    })?;
    let password = config.get_str("password").filter(|p| !p.is_empty());

    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host, port),
        redis: RedisConnectionInfo {
            db,
            password,
            ..RedisConnectionInfo::default()
        },
    })
}

impl RedisStore {
    /// Connect, authenticate and select the configured database.
    ///
    /// `config` is a normalized key-value configuration: `host`, `port`,
    /// `timeout` (seconds), optional `password` and `db`.
    pub async fn connect(config: &ConfigMap) -> HarborResult<Self> {
        let info = connection_info(config)?;
        let timeout_secs = config.get_u64("timeout").unwrap_or(DEFAULT_TIMEOUT_SECS);
        let target = info.addr.to_string();

        let client = redis::Client::open(info).map_err(|e| ConnectionError::Unreachable {
            kind: BackendKind::KeyValue,
            target: target.clone(),
            reason: e.to_string(),
        })?;

        let connecting = ConnectionManager::new(client);
        let conn = match timeout(Duration::from_secs(timeout_secs.max(1)), connecting).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) if e.kind() == redis::ErrorKind::AuthenticationFailed => {
                return Err(ConnectionError::AuthFailed {
                    kind: BackendKind::KeyValue,
                    target,
                    reason: e.to_string(),
                }
                .into())
            }
            Ok(Err(e)) => {
                return Err(ConnectionError::Unreachable {
                    kind: BackendKind::KeyValue,
                    target,
                    reason: e.to_string(),
                }
                .into())
            }
            Err(_) => {
                return Err(ConnectionError::Timeout {
                    kind: BackendKind::KeyValue,
                    target,
                    timeout_secs,
                }
                .into())
            }
        };

        tracing::debug!(addr = %target, "redis connection ready");
        Ok(Self { conn, target })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

fn namespace_index(namespace: &Value) -> Option<i64> {
    match namespace {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl Namespaced for RedisStore {
    async fn select_namespace(&self, namespace: &Value) -> HarborResult<()> {
        let db = namespace_index(namespace).ok_or_else(|| ConnectionError::NamespaceSelect {
            kind: BackendKind::KeyValue,
            namespace: namespace.to_string(),
            reason: "database index must be an integer".to_string(),
        })?;
        self.select(db).await.map_err(|e| {
            ConnectionError::NamespaceSelect {
                kind: BackendKind::KeyValue,
                namespace: db.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> HarborResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| cache_error("get", key, e))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> HarborResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(key, value)
            .await
            .map_err(|e| cache_error("set", key, e))?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> HarborResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, value, ttl_secs)
            .await
            .map_err(|e| cache_error("setex", key, e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> HarborResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .del(key)
            .await
            .map_err(|e| cache_error("del", key, e))?;
        Ok(removed > 0)
    }

    async fn select(&self, db: i64) -> HarborResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SELECT")
            .arg(db)
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_error("select", &db.to_string(), e))?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> HarborResult<bool> {
        let mut conn = self.conn.clone();
        let seconds = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let updated: bool = conn
            .expire(key, seconds)
            .await
            .map_err(|e| cache_error("expire", key, e))?;
        Ok(updated)
    }

    async fn ping(&self) -> HarborResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_error("ping", "", e))?;
        Ok(())
    }
}

/// Registry connector building [`RedisStore`] connections.
///
/// Redis offers no persistent-connection mode here; `persistent` only takes
/// part in connection identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

#[async_trait]
impl Connector for RedisConnector {
    type Connection = RedisStore;

    const KIND: BackendKind = BackendKind::KeyValue;

    async fn connect(&self, config: &ConfigMap, persistent_id: &str) -> HarborResult<RedisStore> {
        tracing::debug!(persistent_id, "connecting to redis");
        RedisStore::connect(config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_namespace_index() {
        assert_eq!(namespace_index(&json!(3)), Some(3));
        assert_eq!(namespace_index(&json!(" 2 ")), Some(2));
        assert_eq!(namespace_index(&json!("two")), None);
        assert_eq!(namespace_index(&Value::Null), None);
    }

    #[test]
    fn test_connection_info_carries_db_and_password() {
        let mut config = BackendKind::KeyValue.defaults();
        config.insert("host".to_string(), json!("kv.internal"));
        config.insert("db".to_string(), json!("4"));
        config.insert("password".to_string(), json!("s3cret"));

        let info = connection_info(&config).unwrap();
        assert_eq!(info.addr.to_string(), "kv.internal:6379");
        assert_eq!(info.redis.db, 4);
        assert_eq!(info.redis.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_connection_info_defaults() {
        let mut config = BackendKind::KeyValue.defaults();
        config.insert("password".to_string(), json!(""));
        let info = connection_info(&config).unwrap();
        assert_eq!(info.redis.db, 0);
        assert_eq!(info.redis.password, None);
    }

    #[test]
    fn test_connection_info_rejects_named_db() {
        let mut config = BackendKind::KeyValue.defaults();
        config.insert("db".to_string(), json!("sessions"));
        let err = connection_info(&config).unwrap_err();
        assert!(matches!(
            err,
            HarborError::Connection(ConnectionError::NamespaceSelect { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let mut config = BackendKind::KeyValue.defaults();
        config.insert("port".to_string(), json!(1));
        config.insert("timeout".to_string(), json!(1));
        let err = RedisStore::connect(&config).await.unwrap_err();
        assert!(err.is_connection(), "unexpected error: {err:?}");
    }
}

//! Database Connection Pool Module
//!
//! PostgreSQL row storage behind the `RowStore` seam, pooled with
//! deadpool-postgres. One pool is built per distinct connection fingerprint
//! by the resource registry; this module only knows how to build a pool from
//! a normalized configuration map and how to run the four row operations.
//!
//! Every table and column name is checked with `validate_identifier` and
//! double-quoted; row values always travel as a single JSON parameter that
//! Postgres expands with `json_populate_record`.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime};
use harbor_core::{
    BackendKind, ConfigMap, ConfigMapExt, ConnectionError, HarborError, HarborResult, RecordId,
    Row, StorageError,
};
use harbor_storage::{validate_identifier, Connector, Namespaced, RowStore};
use serde_json::Value as JsonValue;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use crate::config::DatabaseSettings;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Client encoding
    pub charset: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connect and checkout timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            dbname: "harbor".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            charset: "utf8".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// Read a normalized database configuration map.
    pub fn from_config_map(config: &ConfigMap, max_size: usize, timeout: Duration) -> HarborResult<Self> {
        let defaults = Self::default();
        let port = match config.get_u64("port") {
            Some(port) => u16::try_from(port).map_err(|_| harbor_core::ConfigError::InvalidValue {
                field: "port".to_string(),
                value: port.to_string(),
                reason: "port out of range".to_string(),
            })?,
            None => defaults.port,
        };
        Ok(Self {
            host: config.get_str("host").unwrap_or(defaults.host),
            port,
            dbname: config.get_str("dbname").unwrap_or(defaults.dbname),
            user: config.get_str("username").unwrap_or(defaults.user),
            password: config.get_str("password").unwrap_or_default(),
            charset: config.get_str("charset").unwrap_or(defaults.charset),
            max_size,
            timeout,
        })
    }

    /// `host:port/dbname`, used in errors and logs.
    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.dbname)
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> HarborResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.options = Some(format!("-c client_encoding={}", self.charset));
        cfg.connect_timeout = Some(self.timeout);

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size.max(1));
        pool_config.timeouts.wait = Some(self.timeout);
        pool_config.timeouts.create = Some(self.timeout);
        cfg.pool = Some(pool_config);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            HarborError::from(ConnectionError::Unreachable {
                kind: BackendKind::Database,
                target: self.target(),
                reason: format!("Failed to create pool: {}", e),
            })
        })
    }
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn pool_error(target: &str, timeout: Duration, err: PoolError) -> HarborError {
    let kind = BackendKind::Database;
    let target = target.to_string();
    match err {
        PoolError::Timeout(_) => ConnectionError::Timeout {
            kind,
            target,
            timeout_secs: timeout.as_secs(),
        }
        .into(),
        PoolError::Backend(e) => {
            let auth = matches!(
                e.code(),
                Some(code) if *code == SqlState::INVALID_PASSWORD
                    || *code == SqlState::INVALID_AUTHORIZATION_SPECIFICATION
            );
            if auth {
                ConnectionError::AuthFailed {
                    kind,
                    target,
                    reason: e.to_string(),
                }
                .into()
            } else {
                ConnectionError::Unreachable {
                    kind,
                    target,
                    reason: e.to_string(),
                }
                .into()
            }
        }
        other => ConnectionError::Unreachable {
            kind,
            target,
            reason: other.to_string(),
        }
        .into(),
    }
}

fn query_error(operation: &str, table: &str, err: tokio_postgres::Error) -> HarborError {
    tracing::error!(operation, table, error = ?err, "Database error");
    StorageError::QueryFailed {
        operation: operation.to_string(),
        table: table.to_string(),
        reason: err.to_string(),
    }
    .into()
}

// ============================================================================
// SQL BUILDING
// ============================================================================

fn quote(name: &str) -> HarborResult<String> {
    Ok(format!("\"{}\"", validate_identifier(name)?))
}

fn quoted_columns(row: &Row) -> HarborResult<Vec<String>> {
    row.keys().map(|k| quote(k)).collect()
}

fn insert_body(table: &str, columns: &[String]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {table} DEFAULT VALUES");
    }
    let list = columns.join(", ");
    format!(
        "INSERT INTO {table} ({list}) SELECT {list} FROM json_populate_record(NULL::{table}, $1::json)"
    )
}

fn insert_sql(table: &str, columns: &[String], pk: &str) -> String {
    format!("{} RETURNING {pk}::text", insert_body(table, columns))
}

/// Upsert on the primary key. Without non-key columns the key is assigned
/// to itself so `RETURNING` still yields the row.
fn replace_sql(table: &str, columns: &[String], pk: &str) -> String {
    let mut updates: Vec<String> = columns
        .iter()
        .filter(|c| c.as_str() != pk)
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();
    if updates.is_empty() {
        updates.push(format!("{pk} = EXCLUDED.{pk}"));
    }
    format!(
        "{} ON CONFLICT ({pk}) DO UPDATE SET {} RETURNING {pk}::text",
        insert_body(table, columns),
        updates.join(", ")
    )
}

/// `UPDATE ... SET ... FROM json_populate_record(...) WHERE ...` plus the
/// textual filter parameters, numbered from `$2`.
fn update_sql(table: &str, columns: &[String], filter: &Row) -> HarborResult<(String, Vec<String>)> {
    let assignments = columns
        .iter()
        .map(|c| format!("{c} = src.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut conditions = Vec::with_capacity(filter.len());
    let mut params = Vec::new();
    for (field, value) in filter {
        let column = quote(field)?;
        match value {
            JsonValue::Null => conditions.push(format!("tgt.{column} IS NULL")),
            JsonValue::String(s) => {
                params.push(s.clone());
                conditions.push(format!("tgt.{column}::text = ${}", params.len() + 1));
            }
            other => {
                params.push(other.to_string());
                conditions.push(format!("tgt.{column}::text = ${}", params.len() + 1));
            }
        }
    }

    let sql = format!(
        "UPDATE {table} AS tgt SET {assignments} FROM json_populate_record(NULL::{table}, $1::json) AS src WHERE {}",
        conditions.join(" AND ")
    );
    Ok((sql, params))
}

// ============================================================================
// DATABASE HANDLE
// ============================================================================

/// A pooled Postgres database, handed out by the resource registry.
#[derive(Clone)]
pub struct PgDatabase {
    pool: Pool,
    config: DbConfig,
}

impl std::fmt::Debug for PgDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgDatabase")
            .field("target", &self.config.target())
            .field("max_size", &self.config.max_size)
            .finish()
    }
}

impl PgDatabase {
    pub fn new(pool: Pool, config: DbConfig) -> Self {
        Self { pool, config }
    }

    /// Create a new database handle from configuration.
    pub fn from_config(config: DbConfig) -> HarborResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool, config))
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> HarborResult<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| pool_error(&self.config.target(), self.config.timeout, e))
    }

    /// Check out a connection and run `SELECT 1`.
    pub async fn health_check(&self) -> HarborResult<()> {
        let conn = self.get_conn().await?;
        conn.query_one("SELECT 1", &[])
            .await
            .map_err(|e| query_error("health_check", "-", e))?;
        Ok(())
    }
}

#[async_trait]
impl Namespaced for PgDatabase {
    /// A Postgres session cannot switch databases, so only the database the
    /// pool was opened on is accepted.
    async fn select_namespace(&self, namespace: &JsonValue) -> HarborResult<()> {
        let requested = match namespace {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        if requested == self.config.dbname {
            return Ok(());
        }
        Err(ConnectionError::NamespaceSelect {
            kind: BackendKind::Database,
            namespace: requested,
            reason: format!(
                "connection is bound to database {}; Postgres cannot switch databases in place",
                self.config.dbname
            ),
        }
        .into())
    }
}

#[async_trait]
impl RowStore for PgDatabase {
    async fn find_by_pk(&self, table: &str, pk: &str, id: &RecordId) -> HarborResult<Option<Row>> {
        let sql = format!(
            "SELECT row_to_json(t) FROM {} AS t WHERE t.{}::text = $1 LIMIT 1",
            quote(table)?,
            quote(pk)?
        );
        let conn = self.get_conn().await?;
        let key = id.to_string();
        let row = conn
            .query_opt(sql.as_str(), &[&key])
            .await
            .map_err(|e| query_error("find_by_pk", table, e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let json: Option<JsonValue> = row.get(0);
        Ok(match json {
            Some(JsonValue::Object(map)) => Some(map),
            _ => None,
        })
    }

    async fn insert(&self, table: &str, row: &Row, pk: &str) -> HarborResult<RecordId> {
        let quoted_table = quote(table)?;
        let quoted_pk = quote(pk)?;
        let columns = quoted_columns(row)?;
        let sql = insert_sql(&quoted_table, &columns, &quoted_pk);
        self.write_returning_pk("insert", table, pk, &sql, row, columns.is_empty())
            .await
    }

    async fn replace(&self, table: &str, row: &Row, pk: &str) -> HarborResult<RecordId> {
        let quoted_table = quote(table)?;
        let quoted_pk = quote(pk)?;
        let columns = quoted_columns(row)?;
        if columns.is_empty() {
            return self.insert(table, row, pk).await;
        }
        let sql = replace_sql(&quoted_table, &columns, &quoted_pk);
        self.write_returning_pk("replace", table, pk, &sql, row, false)
            .await
    }

    async fn update(&self, table: &str, values: &Row, filter: &Row) -> HarborResult<u64> {
        let columns = quoted_columns(values)?;
        if columns.is_empty() || filter.is_empty() {
            return Ok(0);
        }
        let (sql, filter_params) = update_sql(&quote(table)?, &columns, filter)?;
        let payload = JsonValue::Object(values.clone());

        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(filter_params.len() + 1);
        params.push(&payload);
        for value in &filter_params {
            params.push(value);
        }

        let conn = self.get_conn().await?;
        let affected = conn
            .execute(sql.as_str(), &params)
            .await
            .map_err(|e| query_error("update", table, e))?;
        tracing::debug!(table, affected, "rows updated");
        Ok(affected)
    }

    async fn ping(&self) -> HarborResult<()> {
        self.health_check().await
    }
}

impl PgDatabase {
    async fn write_returning_pk(
        &self,
        operation: &str,
        table: &str,
        pk: &str,
        sql: &str,
        row: &Row,
        no_params: bool,
    ) -> HarborResult<RecordId> {
        let conn = self.get_conn().await?;
        let payload = JsonValue::Object(row.clone());
        let result = if no_params {
            conn.query_one(sql, &[]).await
        } else {
            conn.query_one(sql, &[&payload]).await
        };
        let returned = result.map_err(|e| query_error(operation, table, e))?;
        let id: Option<String> = returned.get(0);
        id.map(|raw| RecordId::parse(&raw)).ok_or_else(|| {
            StorageError::MissingPrimaryKey {
                table: table.to_string(),
                pk: pk.to_string(),
            }
            .into()
        })
    }
}

// ============================================================================
// CONNECTOR
// ============================================================================

/// Builds one `PgDatabase` pool per registry key.
#[derive(Debug, Clone)]
pub struct PgConnector {
    max_size: usize,
    timeout: Duration,
}

impl Default for PgConnector {
    fn default() -> Self {
        Self::from_settings(&DatabaseSettings::default())
    }
}

impl PgConnector {
    pub fn new(max_size: usize, timeout: Duration) -> Self {
        Self { max_size, timeout }
    }

    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self::new(
            settings.pool_size,
            Duration::from_secs(settings.connect_timeout_secs.max(1)),
        )
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgDatabase;
    const KIND: BackendKind = BackendKind::Database;

    async fn connect(&self, config: &ConfigMap, persistent_id: &str) -> HarborResult<PgDatabase> {
        let db_config = DbConfig::from_config_map(config, self.max_size, self.timeout)?;
        let database = PgDatabase::from_config(db_config)?;
        database.health_check().await?;
        tracing::info!(
            target_db = %database.config().target(),
            key = persistent_id,
            max_size = database.config().max_size,
            "Database pool created"
        );
        Ok(database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: JsonValue) -> Row {
        match value {
            JsonValue::Object(map) => map,
            _ => Row::new(),
        }
    }

    #[test]
    fn test_db_config_from_map() -> HarborResult<()> {
        let map = BackendKind::Database.normalize(&ConfigMap::from([
            ("host".to_string(), json!("db.internal")),
            ("port".to_string(), json!("6543")),
            ("dbname".to_string(), json!("shop")),
        ]));
        let config = DbConfig::from_config_map(&map, 4, Duration::from_secs(2))?;
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6543);
        assert_eq!(config.user, "postgres");
        assert_eq!(config.target(), "db.internal:6543/shop");
        assert_eq!(config.max_size, 4);
        Ok(())
    }

    #[test]
    fn test_db_config_rejects_out_of_range_port() {
        let map = ConfigMap::from([("port".to_string(), json!(70000))]);
        assert!(DbConfig::from_config_map(&map, 1, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_insert_sql_uses_populate_record() -> HarborResult<()> {
        let data = row(json!({"name": "a", "score": 3}));
        let columns = quoted_columns(&data)?;
        let sql = insert_sql("\"t_game\"", &columns, "\"id\"");
        assert_eq!(
            sql,
            "INSERT INTO \"t_game\" (\"name\", \"score\") SELECT \"name\", \"score\" FROM json_populate_record(NULL::\"t_game\", $1::json) RETURNING \"id\"::text"
        );
        assert_eq!(
            insert_sql("\"t_game\"", &[], "\"id\""),
            "INSERT INTO \"t_game\" DEFAULT VALUES RETURNING \"id\"::text"
        );
        Ok(())
    }

    #[test]
    fn test_replace_sql_updates_non_key_columns() -> HarborResult<()> {
        let data = row(json!({"id": 5, "name": "a"}));
        let columns = quoted_columns(&data)?;
        let sql = replace_sql("\"t\"", &columns, "\"id\"");
        assert!(sql.contains("ON CONFLICT (\"id\") DO UPDATE SET \"name\" = EXCLUDED.\"name\""));
        assert!(sql.ends_with("RETURNING \"id\"::text"));
        assert_eq!(sql.matches("RETURNING").count(), 1);
        Ok(())
    }

    #[test]
    fn test_update_sql_filters() -> HarborResult<()> {
        let values = row(json!({"name": "b"}));
        let filter = row(json!({"id": 5, "deleted_at": null, "kind": "x"}));
        let (sql, params) = update_sql("\"t\"", &quoted_columns(&values)?, &filter)?;
        assert!(sql.starts_with("UPDATE \"t\" AS tgt SET \"name\" = src.\"name\" FROM"));
        assert!(sql.contains("tgt.\"deleted_at\" IS NULL"));
        assert!(sql.contains("tgt.\"id\"::text = $2"));
        assert!(sql.contains("tgt.\"kind\"::text = $3"));
        assert_eq!(params, vec!["5".to_string(), "x".to_string()]);
        Ok(())
    }

    #[test]
    fn test_unsafe_column_rejected() {
        let data = row(json!({"name; DROP TABLE t": 1}));
        assert!(matches!(
            quoted_columns(&data),
            Err(HarborError::Storage(StorageError::InvalidIdentifier { .. }))
        ));
    }
}

//! HARBOR Test Utilities
//!
//! Centralized test infrastructure for the HARBOR workspace:
//! - In-memory key-value and row-store backends with registry connectors
//! - Proptest generators for configuration maps and rows
//! - Test fixtures for common scenarios
//! - Custom assertions for HARBOR error shapes

pub use harbor_core::{
    BackendKind, ConfigCatalog, ConfigError, ConfigMap, ConfigSource, ConnectionError,
    HarborError, HarborResult, RecordId, Row, StorageError,
};

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use harbor_core::ConfigMapExt;
use harbor_storage::{Connector, KeyValueStore, Namespaced, RowStore};
use serde_json::Value;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// MOCK KEY-VALUE BACKEND
// ============================================================================

/// An in-memory key-value "server" shared by every connection built from it.
///
/// Keys live in numbered databases like a Redis server. Expiry is recorded
/// but not enforced; tests inspect it through [`MockKvServer::ttl_of`].
#[derive(Debug, Default)]
pub struct MockKvServer {
    data: Mutex<HashMap<(i64, String), (String, Option<u64>)>>,
    commands: Mutex<Vec<String>>,
}

impl MockKvServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Commands received so far, e.g. `"SETEX 0 key 30"`.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }

    pub fn clear_commands(&self) {
        lock(&self.commands).clear();
    }

    /// Raw stored payload of `key` in database `db`.
    pub fn raw(&self, db: i64, key: &str) -> Option<String> {
        lock(&self.data)
            .get(&(db, key.to_string()))
            .map(|(value, _)| value.clone())
    }

    /// Expiry recorded for `key`, `None` when absent or persistent.
    pub fn ttl_of(&self, db: i64, key: &str) -> Option<u64> {
        lock(&self.data)
            .get(&(db, key.to_string()))
            .and_then(|(_, ttl)| *ttl)
    }

    /// Store a raw payload directly, bypassing any driver.
    pub fn put_raw(&self, db: i64, key: &str, value: &str) {
        lock(&self.data).insert((db, key.to_string()), (value.to_string(), None));
    }

    pub fn len(&self) -> usize {
        lock(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, command: String) {
        lock(&self.commands).push(command);
    }
}

/// One connection to a [`MockKvServer`] with its own selected database.
#[derive(Debug)]
pub struct MockKvConnection {
    server: Arc<MockKvServer>,
    selected: AtomicI64,
    id: usize,
}

impl MockKvConnection {
    pub fn new(server: Arc<MockKvServer>, db: i64) -> Self {
        Self {
            server,
            selected: AtomicI64::new(db),
            id: 0,
        }
    }

    /// Currently selected database.
    pub fn selected(&self) -> i64 {
        self.selected.load(Ordering::SeqCst)
    }

    /// Build sequence number assigned by the connector.
    pub fn id(&self) -> usize {
        self.id
    }

    fn slot(&self, key: &str) -> (i64, String) {
        (self.selected(), key.to_string())
    }
}

#[async_trait]
impl KeyValueStore for MockKvConnection {
    async fn get(&self, key: &str) -> HarborResult<Option<String>> {
        self.server.record(format!("GET {} {key}", self.selected()));
        Ok(lock(&self.server.data)
            .get(&self.slot(key))
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> HarborResult<()> {
        self.server.record(format!("SET {} {key}", self.selected()));
        lock(&self.server.data).insert(self.slot(key), (value.to_string(), None));
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> HarborResult<()> {
        self.server
            .record(format!("SETEX {} {key} {ttl_secs}", self.selected()));
        lock(&self.server.data).insert(self.slot(key), (value.to_string(), Some(ttl_secs)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> HarborResult<bool> {
        self.server.record(format!("DEL {} {key}", self.selected()));
        Ok(lock(&self.server.data).remove(&self.slot(key)).is_some())
    }

    async fn select(&self, db: i64) -> HarborResult<()> {
        self.server.record(format!("SELECT {db}"));
        self.selected.store(db, Ordering::SeqCst);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> HarborResult<bool> {
        let mut data = lock(&self.server.data);
        match data.get_mut(&self.slot(key)) {
            Some(entry) => {
                entry.1 = Some(ttl_secs);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ping(&self) -> HarborResult<()> {
        Ok(())
    }
}

#[async_trait]
impl Namespaced for MockKvConnection {
    async fn select_namespace(&self, namespace: &Value) -> HarborResult<()> {
        let db = namespace.as_i64().ok_or_else(|| ConnectionError::NamespaceSelect {
            kind: BackendKind::KeyValue,
            namespace: namespace.to_string(),
            reason: "not an integer".to_string(),
        })?;
        self.select(db).await
    }
}

/// Registry connector for [`MockKvConnection`]s that counts constructions
/// and can be told to fail.
#[derive(Debug, Default)]
pub struct MockKvConnector {
    server: Arc<MockKvServer>,
    builds: AtomicUsize,
    fail_next: AtomicBool,
}

impl MockKvConnector {
    pub fn new(server: Arc<MockKvServer>) -> Self {
        Self {
            server,
            builds: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn server(&self) -> &Arc<MockKvServer> {
        &self.server
    }

    /// Number of connections constructed so far.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Make the next `connect` fail with an unreachable-host error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockKvConnector {
    type Connection = MockKvConnection;

    const KIND: BackendKind = BackendKind::KeyValue;

    async fn connect(&self, config: &ConfigMap, _persistent_id: &str) -> HarborResult<MockKvConnection> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ConnectionError::Unreachable {
                kind: BackendKind::KeyValue,
                target: config.get_str("host").unwrap_or_default(),
                reason: "connection refused".to_string(),
            }
            .into());
        }
        let id = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        let db = config.get_u64("db").unwrap_or(0) as i64;
        let mut connection = MockKvConnection::new(Arc::clone(&self.server), db);
        connection.id = id;
        Ok(connection)
    }
}

// ============================================================================
// MOCK ROW STORE
// ============================================================================

/// In-memory tables keyed by primary key display form.
#[derive(Debug)]
pub struct MockRowServer {
    tables: Mutex<HashMap<String, BTreeMap<String, Row>>>,
    next_id: AtomicI64,
    find_calls: AtomicUsize,
    fail_writes: AtomicBool,
    unreachable: AtomicBool,
}

impl Default for MockRowServer {
    fn default() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            find_calls: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
        }
    }
}

impl MockRowServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a row directly. `row` must carry its primary key under `pk`.
    pub fn seed(&self, table: &str, pk: &str, row: Row) {
        let id = row
            .get(pk)
            .and_then(RecordId::from_json)
            .map(|id| id.to_string())
            .unwrap_or_default();
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .insert(id, row);
    }

    pub fn row(&self, table: &str, id: &RecordId) -> Option<Row> {
        lock(&self.tables)
            .get(table)
            .and_then(|rows| rows.get(&id.to_string()))
            .cloned()
    }

    /// Number of `find_by_pk` calls served.
    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    /// Make every write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Simulate the server going away: pings fail until reset.
    pub fn set_unreachable(&self, down: bool) {
        self.unreachable.store(down, Ordering::SeqCst);
    }

    fn check_writable(&self, operation: &str, table: &str) -> HarborResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::QueryFailed {
                operation: operation.to_string(),
                table: table.to_string(),
                reason: "server has gone away".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn assign_id(&self, row: &Row, pk: &str) -> RecordId {
        match row.get(pk).and_then(RecordId::from_json) {
            Some(id) => id,
            None => RecordId::Int(self.next_id.fetch_add(1, Ordering::SeqCst)),
        }
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (RecordId::from_json(a), RecordId::from_json(b)) {
        (Some(a), Some(b)) => a.to_string() == b.to_string(),
        _ => a == b,
    }
}

/// Connection to a [`MockRowServer`].
#[derive(Debug)]
pub struct MockRowConnection {
    server: Arc<MockRowServer>,
    namespace: Mutex<Value>,
}

impl MockRowConnection {
    pub fn namespace(&self) -> Value {
        lock(&self.namespace).clone()
    }
}

#[async_trait]
impl Namespaced for MockRowConnection {
    async fn select_namespace(&self, namespace: &Value) -> HarborResult<()> {
        *lock(&self.namespace) = namespace.clone();
        Ok(())
    }
}

#[async_trait]
impl RowStore for MockRowConnection {
    async fn find_by_pk(&self, table: &str, _pk: &str, id: &RecordId) -> HarborResult<Option<Row>> {
        self.server.find_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.server.row(table, id))
    }

    async fn insert(&self, table: &str, row: &Row, pk: &str) -> HarborResult<RecordId> {
        self.server.check_writable("insert", table)?;
        let id = self.server.assign_id(row, pk);
        let mut stored = row.clone();
        stored.insert(pk.to_string(), id.to_json());
        let mut tables = lock(&self.server.tables);
        let rows = tables.entry(table.to_string()).or_default();
        if rows.contains_key(&id.to_string()) {
            return Err(StorageError::QueryFailed {
                operation: "insert".to_string(),
                table: table.to_string(),
                reason: format!("duplicate key {id}"),
            }
            .into());
        }
        rows.insert(id.to_string(), stored);
        Ok(id)
    }

    async fn replace(&self, table: &str, row: &Row, pk: &str) -> HarborResult<RecordId> {
        self.server.check_writable("replace", table)?;
        let id = self.server.assign_id(row, pk);
        let mut stored = row.clone();
        stored.insert(pk.to_string(), id.to_json());
        lock(&self.server.tables)
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), stored);
        Ok(id)
    }

    async fn update(&self, table: &str, values: &Row, filter: &Row) -> HarborResult<u64> {
        self.server.check_writable("update", table)?;
        let mut tables = lock(&self.server.tables);
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let mut affected = 0;
        for row in rows.values_mut() {
            let matches = filter.iter().all(|(field, expected)| {
                row.get(field)
                    .map(|actual| same_value(actual, expected))
                    .unwrap_or(false)
            });
            if matches {
                for (field, value) in values {
                    row.insert(field.clone(), value.clone());
                }
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn ping(&self) -> HarborResult<()> {
        if self.server.unreachable.load(Ordering::SeqCst) {
            return Err(ConnectionError::Unreachable {
                kind: BackendKind::Database,
                target: "mock-rows".to_string(),
                reason: "server closed the connection unexpectedly".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Registry connector for [`MockRowConnection`]s.
#[derive(Debug, Default)]
pub struct MockRowConnector {
    server: Arc<MockRowServer>,
    builds: AtomicUsize,
}

impl MockRowConnector {
    pub fn new(server: Arc<MockRowServer>) -> Self {
        Self {
            server,
            builds: AtomicUsize::new(0),
        }
    }

    pub fn server(&self) -> &Arc<MockRowServer> {
        &self.server
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockRowConnector {
    type Connection = MockRowConnection;

    const KIND: BackendKind = BackendKind::Database;

    async fn connect(&self, config: &ConfigMap, _persistent_id: &str) -> HarborResult<MockRowConnection> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(MockRowConnection {
            server: Arc::clone(&self.server),
            namespace: Mutex::new(config.get("dbname").cloned().unwrap_or(Value::Null)),
        })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for HARBOR inputs.

    use super::*;
    use proptest::prelude::*;

    /// A key-value connection config built only from recognized keys.
    pub fn arb_kv_config() -> impl Strategy<Value = ConfigMap> {
        (
            prop_oneof![Just("127.0.0.1".to_string()), "[a-z]{1,8}\\.local"],
            1u16..=u16::MAX,
            0i64..16,
            any::<bool>(),
            0u64..3600,
        )
            .prop_map(|(host, port, db, persistent, ttl)| {
                let mut config = ConfigMap::new();
                config.insert("host".to_string(), Value::from(host));
                config.insert("port".to_string(), Value::from(port));
                config.insert("db".to_string(), Value::from(db));
                config.insert("persistent".to_string(), Value::from(persistent));
                config.insert("ttl".to_string(), Value::from(ttl));
                config
            })
    }

    /// A key no backend kind recognizes.
    pub fn arb_noise_key() -> impl Strategy<Value = String> {
        "x_[a-z]{1,10}"
    }

    /// A flat row of scalar fields without a primary key.
    pub fn arb_row() -> impl Strategy<Value = Row> {
        prop::collection::btree_map("[a-z]{1,8}", any::<i32>(), 0..6).prop_map(|fields| {
            fields
                .into_iter()
                .filter(|(name, _)| name != "id")
                .map(|(name, value)| (name, Value::from(value)))
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built catalogs and backends for common scenarios.

    use super::*;
    use harbor_storage::{CacheAsideStore, EntityDef, ResourceRegistry};
    use serde_json::json;

    /// Catalog with a `db` and a `redis` section.
    pub fn catalog() -> ConfigCatalog {
        let mut db = ConfigMap::new();
        db.insert("host".to_string(), json!("db.test"));
        db.insert("dbname".to_string(), json!("harbor"));
        let mut redis = ConfigMap::new();
        redis.insert("host".to_string(), json!("kv.test"));
        redis.insert("db".to_string(), json!(0));
        ConfigCatalog::new()
            .with_section("db", db)
            .with_section("redis", redis)
    }

    /// The `User` entity in database `harbor`.
    pub fn user_entity() -> EntityDef {
        EntityDef::new("User", "", "harbor")
    }

    /// A row from a JSON object literal.
    pub fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture row must be an object, got {other}"),
        }
    }

    /// Cache-aside store over fresh in-memory backends.
    pub struct TestStore {
        pub kv: Arc<MockKvServer>,
        pub rows: Arc<MockRowServer>,
        pub store: CacheAsideStore<MockKvConnector, MockRowConnector>,
    }

    pub fn test_store() -> TestStore {
        test_store_with(catalog())
    }

    /// Cache-aside store resolving connection sections through `catalog`.
    pub fn test_store_with(catalog: ConfigCatalog) -> TestStore {
        let kv = MockKvServer::new();
        let rows = MockRowServer::new();
        let catalog = Arc::new(catalog);
        let cache_registry = Arc::new(ResourceRegistry::new(
            MockKvConnector::new(Arc::clone(&kv)),
            Arc::clone(&catalog),
        ));
        let row_registry = Arc::new(ResourceRegistry::new(
            MockRowConnector::new(Arc::clone(&rows)),
            catalog,
        ));
        TestStore {
            kv,
            rows,
            store: CacheAsideStore::new(cache_registry, row_registry),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for HARBOR error shapes.

    use super::*;

    /// Assert that a HarborResult is a Connection error.
    #[track_caller]
    pub fn assert_connection_error<T: std::fmt::Debug>(result: &HarborResult<T>) {
        match result {
            Err(HarborError::Connection(_)) => {}
            other => panic!("Expected Connection error, got: {:?}", other),
        }
    }

    /// Assert that a HarborResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &HarborResult<T>) {
        match result {
            Err(HarborError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a HarborResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &HarborResult<T>) {
        match result {
            Err(HarborError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }
}

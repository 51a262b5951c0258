//! Shared application state for Axum routers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use harbor_core::{HarborResult, RecordId, Row};
use harbor_storage::{
    entity::snake_case, CacheAsideStore, Connector, EntityDef, FileCache, KeyValueStore, Loaded,
    NamespaceOptions, RowStore, SaveMode, SaveOutcome,
};

use crate::config::Settings;
use crate::telemetry::ErrorReporter;

// ============================================================================
// RECORD BACKEND
// ============================================================================

/// Cache-aside operations as seen by the HTTP handlers.
///
/// Object-safe so the router does not carry the connector types.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    async fn load(
        &self,
        entity: &EntityDef,
        id: &RecordId,
        options: &NamespaceOptions,
    ) -> HarborResult<Loaded>;

    async fn save(
        &self,
        entity: &EntityDef,
        data: Row,
        filter: Option<Row>,
        mode: SaveMode,
    ) -> HarborResult<SaveOutcome>;

    async fn invalidate(
        &self,
        entity: &EntityDef,
        id: &RecordId,
        options: &NamespaceOptions,
    ) -> HarborResult<bool>;

    async fn ping(&self, entity: &EntityDef) -> HarborResult<()>;

    /// Drop pooled connections.
    fn close(&self) {}
}

#[async_trait]
impl<K, D> RecordBackend for CacheAsideStore<K, D>
where
    K: Connector,
    K::Connection: KeyValueStore,
    D: Connector,
    D::Connection: RowStore,
{
    async fn load(
        &self,
        entity: &EntityDef,
        id: &RecordId,
        options: &NamespaceOptions,
    ) -> HarborResult<Loaded> {
        CacheAsideStore::load(self, entity, id, options).await
    }

    async fn save(
        &self,
        entity: &EntityDef,
        data: Row,
        filter: Option<Row>,
        mode: SaveMode,
    ) -> HarborResult<SaveOutcome> {
        CacheAsideStore::save(self, entity, data, filter, mode).await
    }

    async fn invalidate(
        &self,
        entity: &EntityDef,
        id: &RecordId,
        options: &NamespaceOptions,
    ) -> HarborResult<bool> {
        CacheAsideStore::invalidate(self, entity, id, options).await
    }

    async fn ping(&self, entity: &EntityDef) -> HarborResult<()> {
        CacheAsideStore::ping(self, entity).await
    }

    fn close(&self) {
        self.cache_registry().close();
        self.row_registry().close();
    }
}

// ============================================================================
// ENTITY CATALOG
// ============================================================================

/// Configured entities, addressable by name (any case), snake_case name or
/// table name.
#[derive(Debug, Clone, Default)]
pub struct EntityCatalog {
    entities: Vec<Arc<EntityDef>>,
    index: HashMap<String, usize>,
}

impl EntityCatalog {
    pub fn new(defs: impl IntoIterator<Item = EntityDef>) -> Self {
        let mut catalog = Self::default();
        for def in defs {
            let slot = catalog.entities.len();
            for alias in [def.name().to_lowercase(), snake_case(def.name()), def.table().to_lowercase()] {
                catalog.index.entry(alias).or_insert(slot);
            }
            catalog.entities.push(Arc::new(def));
        }
        catalog
    }

    pub fn get(&self, name: &str) -> Option<Arc<EntityDef>> {
        self.index
            .get(&name.to_lowercase())
            .and_then(|slot| self.entities.get(*slot))
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityDef>> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// ============================================================================
// APP STATE
// ============================================================================

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub records: Arc<dyn RecordBackend>,
    pub entities: Arc<EntityCatalog>,
    pub reporter: Arc<ErrorReporter>,
    /// Local file cache; probed by the readiness check.
    pub file_cache: Arc<FileCache>,
    pub settings: Arc<Settings>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        records: Arc<dyn RecordBackend>,
        entities: EntityCatalog,
        reporter: Arc<ErrorReporter>,
        settings: Arc<Settings>,
    ) -> Self {
        let file_cache = Arc::new(FileCache::new(
            settings.cache.path.clone(),
            settings.cache.default_ttl,
        ));
        Self {
            records,
            entities: Arc::new(entities),
            reporter,
            file_cache,
            settings,
            start_time: Instant::now(),
        }
    }
}

crate::impl_from_ref!(Arc<dyn RecordBackend>, records);
crate::impl_from_ref!(Arc<EntityCatalog>, entities);
crate::impl_from_ref!(Arc<ErrorReporter>, reporter);
crate::impl_from_ref!(Arc<FileCache>, file_cache);
crate::impl_from_ref!(Arc<Settings>, settings);
crate::impl_from_ref!(Instant, start_time);

//! Cache-aside data access.
//!
//! Reads go cache first and fall back to the row store, populating the cache
//! on the way out. Inserts and replaces copy the stored row into the cache;
//! updates invalidate the cached copy of the row they changed. Absence is
//! never cached.

use std::sync::Arc;

use harbor_core::{ConfigSource, HarborResult, RecordId, Row, StorageError};
use serde_json::Value;

use crate::cache::{CacheDriver, CacheValue, KeyValueStore, RemoteCache};
use crate::entity::EntityDef;
use crate::registry::{Connector, IdentityOptions, Pooled, ResourceRegistry};
use crate::rows::RowStore;

/// Registry label for cache connections acquired by the store.
pub const CACHE_LABEL: &str = "cache_aside::cache";
/// Registry label for row-store connections acquired by the store.
pub const ROWS_LABEL: &str = "cache_aside::rows";

/// Per-call overrides for cache placement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamespaceOptions {
    /// Key-value database to select instead of the configured one.
    pub db: Option<i64>,
    /// Prefix replacing the entity's `"{database}.{Table}-"` prefix.
    pub prefix: Option<String>,
}

impl NamespaceOptions {
    pub fn with_db(mut self, db: i64) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// How `save` writes a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Insert,
    /// Insert or overwrite by primary key.
    Replace,
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted(RecordId),
    Replaced(RecordId),
    Updated(u64),
}

/// Where a load was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Cache,
    RowStore,
    /// Neither the cache nor the row store had the record.
    Absent,
}

/// Result of [`CacheAsideStore::load`].
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded {
    pub row: Option<Row>,
    pub source: LoadSource,
}

/// Cache-aside access over a key-value cache registry and a row-store
/// registry.
pub struct CacheAsideStore<K: Connector, D: Connector> {
    cache: Arc<ResourceRegistry<K>>,
    rows: Arc<ResourceRegistry<D>>,
}

impl<K: Connector, D: Connector> Clone for CacheAsideStore<K, D> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            rows: Arc::clone(&self.rows),
        }
    }
}

impl<K, D> CacheAsideStore<K, D>
where
    K: Connector,
    K::Connection: KeyValueStore,
    D: Connector,
    D::Connection: RowStore,
{
    pub fn new(cache: Arc<ResourceRegistry<K>>, rows: Arc<ResourceRegistry<D>>) -> Self {
        Self { cache, rows }
    }

    pub fn cache_registry(&self) -> &ResourceRegistry<K> {
        &self.cache
    }

    pub fn row_registry(&self) -> &ResourceRegistry<D> {
        &self.rows
    }

    /// Cache connection for `entity`, one per key-value namespace.
    ///
    /// The namespace is part of the connection identity, so the only `SELECT`
    /// a connection ever sees is the one issued when it is built. A `db`
    /// override therefore never moves the connection other callers use.
    async fn cache_for(
        &self,
        entity: &EntityDef,
        options: &NamespaceOptions,
    ) -> HarborResult<RemoteCache<Arc<Pooled<K::Connection>>>> {
        let source = match options.db {
            Some(db) => {
                let raw = self.cache.catalog().resolve(entity.cache_source())?;
                let mut config = K::KIND.normalize(&raw);
                config.insert(K::KIND.namespace_key().to_string(), Value::from(db));
                ConfigSource::Inline(config)
            }
            None => entity.cache_source().clone(),
        };
        let pooled = self
            .cache
            .acquire(&source, CACHE_LABEL, IdentityOptions::default())
            .await?;
        Ok(RemoteCache::from_pooled(pooled))
    }

    async fn rows_for(&self, entity: &EntityDef) -> HarborResult<Arc<Pooled<D::Connection>>> {
        self.rows
            .acquire(entity.db_source(), ROWS_LABEL, IdentityOptions::default())
            .await
    }

    /// Load a row by primary key, reporting where the answer came from.
    pub async fn load(
        &self,
        entity: &EntityDef,
        id: &RecordId,
        options: &NamespaceOptions,
    ) -> HarborResult<Loaded> {
        let cache = self.cache_for(entity, options).await?;
        let key = entity.cache_key(id, options.prefix.as_deref());

        if let Some(value) = cache.get(&key).await? {
            match value.into_row() {
                Some(mut row) => {
                    entity.decode_extend(&mut row);
                    return Ok(Loaded {
                        row: Some(row),
                        source: LoadSource::Cache,
                    });
                }
                None => {
                    tracing::warn!(key = %key, "cached value is not a row; reloading from row store");
                }
            }
        }

        let rows = self.rows_for(entity).await?;
        let Some(mut row) = rows.find_by_pk(entity.table(), entity.pk(), id).await? else {
            return Ok(Loaded {
                row: None,
                source: LoadSource::Absent,
            });
        };

        cache
            .set(&key, &CacheValue::from(row.clone()), None)
            .await?;
        entity.decode_extend(&mut row);
        Ok(Loaded {
            row: Some(row),
            source: LoadSource::RowStore,
        })
    }

    /// Read-through load by primary key.
    pub async fn load_by_key(
        &self,
        entity: &EntityDef,
        id: &RecordId,
        options: &NamespaceOptions,
    ) -> HarborResult<Option<Row>> {
        Ok(self.load(entity, id, options).await?.row)
    }

    /// Delete the cached copy of a row. Returns whether a copy existed.
    pub async fn invalidate(
        &self,
        entity: &EntityDef,
        id: &RecordId,
        options: &NamespaceOptions,
    ) -> HarborResult<bool> {
        let cache = self.cache_for(entity, options).await?;
        let key = entity.cache_key(id, options.prefix.as_deref());
        let removed = cache.remove(&key).await?;
        tracing::debug!(key = %key, removed, "cache entry invalidated");
        Ok(removed)
    }

    /// Write a row.
    ///
    /// Field hooks run first. `filter` only applies to [`SaveMode::Update`];
    /// without one the update targets `data[pk]`.
    pub async fn save(
        &self,
        entity: &EntityDef,
        data: Row,
        filter: Option<Row>,
        mode: SaveMode,
    ) -> HarborResult<SaveOutcome> {
        let rows = self.rows_for(entity).await?;
        let mut data = entity.apply_field_hooks(data);
        let pk = entity.pk();

        match mode {
            SaveMode::Insert | SaveMode::Replace => {
                entity.run_before_insert(&mut data)?;
                let id = if mode == SaveMode::Insert {
                    rows.insert(entity.table(), &data, pk).await?
                } else {
                    rows.replace(entity.table(), &data, pk).await?
                };
                data.insert(pk.to_string(), id.to_json());
                entity.run_after_insert(&mut data)?;

                let primed = self.prime(entity, &rows, &id).await;
                if mode == SaveMode::Insert {
                    if let Err(err) = primed {
                        tracing::warn!(
                            table = entity.table(),
                            id = %id,
                            error = %err,
                            "failed to prime cache after insert"
                        );
                    }
                    Ok(SaveOutcome::Inserted(id))
                } else {
                    if let Err(err) = primed {
                        tracing::warn!(
                            table = entity.table(),
                            id = %id,
                            error = %err,
                            "failed to prime cache after replace"
                        );
                        self.invalidate(entity, &id, &NamespaceOptions::default())
                            .await?;
                    }
                    Ok(SaveOutcome::Replaced(id))
                }
            }
            SaveMode::Update => {
                let data_id = data.get(pk).and_then(RecordId::from_json);
                let filter = match filter {
                    Some(filter) if !filter.is_empty() => filter,
                    _ => {
                        let id = data_id.clone().ok_or_else(|| StorageError::MissingPrimaryKey {
                            table: entity.table().to_string(),
                            pk: pk.to_string(),
                        })?;
                        let mut filter = Row::new();
                        filter.insert(pk.to_string(), id.to_json());
                        filter
                    }
                };

                let affected = rows.update(entity.table(), &data, &filter).await?;
                if affected > 0 {
                    let target = data_id.or_else(|| filter.get(pk).and_then(RecordId::from_json));
                    match target {
                        Some(id) => {
                            self.invalidate(entity, &id, &NamespaceOptions::default())
                                .await?;
                        }
                        None => {
                            tracing::debug!(
                                table = entity.table(),
                                affected,
                                "update matched rows without a primary key; nothing to invalidate"
                            );
                        }
                    }
                }
                Ok(SaveOutcome::Updated(affected))
            }
        }
    }

    /// Copy the stored row for `id` into the cache.
    async fn prime(
        &self,
        entity: &EntityDef,
        rows: &Pooled<D::Connection>,
        id: &RecordId,
    ) -> HarborResult<()> {
        let Some(row) = rows.find_by_pk(entity.table(), entity.pk(), id).await? else {
            return Ok(());
        };
        let cache = self.cache_for(entity, &NamespaceOptions::default()).await?;
        cache
            .set(&entity.cache_key(id, None), &CacheValue::from(row), None)
            .await
    }

    /// Check that both backends of `entity` can be reached.
    pub async fn ping(&self, entity: &EntityDef) -> HarborResult<()> {
        let cache = self.cache_for(entity, &NamespaceOptions::default()).await?;
        cache.store().ping().await?;
        self.rows_for(entity).await?.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_options_builders() {
        let options = NamespaceOptions::default().with_db(3).with_prefix("p:");
        assert_eq!(options.db, Some(3));
        assert_eq!(options.prefix.as_deref(), Some("p:"));
        assert_eq!(NamespaceOptions::default().db, None);
    }

    #[test]
    fn test_labels_are_distinct() {
        assert_ne!(CACHE_LABEL, ROWS_LABEL);
    }
}

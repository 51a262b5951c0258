//! Persistence backend seam for the cache-aside store.

use std::sync::Arc;

use async_trait::async_trait;
use harbor_core::{HarborResult, RecordId, Row, StorageError};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::registry::Pooled;

/// Row-level access to a relational store.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Fetch the row whose `pk` column equals `id`.
    async fn find_by_pk(&self, table: &str, pk: &str, id: &RecordId) -> HarborResult<Option<Row>>;

    /// Insert `row`, returning the generated (or supplied) primary key.
    async fn insert(&self, table: &str, row: &Row, pk: &str) -> HarborResult<RecordId>;

    /// Insert or overwrite the row keyed by `row[pk]`, returning its key.
    async fn replace(&self, table: &str, row: &Row, pk: &str) -> HarborResult<RecordId>;

    /// Update rows matching every `filter` column, returning the affected count.
    async fn update(&self, table: &str, values: &Row, filter: &Row) -> HarborResult<u64>;

    /// Round-trip to the server.
    async fn ping(&self) -> HarborResult<()>;
}

#[async_trait]
impl<S: RowStore + ?Sized> RowStore for Arc<S> {
    async fn find_by_pk(&self, table: &str, pk: &str, id: &RecordId) -> HarborResult<Option<Row>> {
        (**self).find_by_pk(table, pk, id).await
    }
    async fn insert(&self, table: &str, row: &Row, pk: &str) -> HarborResult<RecordId> {
        (**self).insert(table, row, pk).await
    }
    async fn replace(&self, table: &str, row: &Row, pk: &str) -> HarborResult<RecordId> {
        (**self).replace(table, row, pk).await
    }
    async fn update(&self, table: &str, values: &Row, filter: &Row) -> HarborResult<u64> {
        (**self).update(table, values, filter).await
    }
    async fn ping(&self) -> HarborResult<()> {
        (**self).ping().await
    }
}

#[async_trait]
impl<S: RowStore> RowStore for Pooled<S> {
    async fn find_by_pk(&self, table: &str, pk: &str, id: &RecordId) -> HarborResult<Option<Row>> {
        self.handle().find_by_pk(table, pk, id).await
    }
    async fn insert(&self, table: &str, row: &Row, pk: &str) -> HarborResult<RecordId> {
        self.handle().insert(table, row, pk).await
    }
    async fn replace(&self, table: &str, row: &Row, pk: &str) -> HarborResult<RecordId> {
        self.handle().replace(table, row, pk).await
    }
    async fn update(&self, table: &str, values: &Row, filter: &Row) -> HarborResult<u64> {
        self.handle().update(table, values, filter).await
    }
    async fn ping(&self) -> HarborResult<()> {
        self.handle().ping().await
    }
}

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("Invalid identifier regex"));

/// Reject anything that is not a plain SQL identifier.
///
/// Table and column names are interpolated into statements, so every name
/// coming from a row or an entity definition passes through here first.
pub fn validate_identifier(name: &str) -> HarborResult<&str> {
    if IDENTIFIER.is_match(name) {
        Ok(name)
    } else {
        Err(StorageError::InvalidIdentifier {
            name: name.to_string(),
        }
        .into())
    }
}

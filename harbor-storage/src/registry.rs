//! Keyed registry of pooled backend connections.
//!
//! A registry owns every connection it builds for the lifetime of the worker.
//! Connections are keyed by a caller-supplied label concatenated with the
//! fingerprint of the filtered configuration, so many call sites can share a
//! physical connection without any cross-worker coordination.
//!
//! Connections are only dropped by [`ResourceRegistry::close`]. Labels and
//! configurations must therefore come from a bounded set; feeding an unbounded
//! variety of dynamic configurations through `acquire` leaks connections.

use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use harbor_core::{
    BackendKind, ConfigCatalog, ConfigFingerprint, ConfigMap, ConfigSource, HarborResult,
};
use serde_json::Value;
use tokio::sync::OnceCell;

/// A connection whose selected database/namespace can be switched in place.
#[async_trait]
pub trait Namespaced: Send + Sync {
    /// Re-issue the "select namespace" command on this connection.
    async fn select_namespace(&self, namespace: &Value) -> HarborResult<()>;
}

/// Builds connections of one backend kind from a normalized configuration.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type handed out by the registry.
    type Connection: Namespaced + 'static;

    /// Backend kind, which fixes recognized keys, defaults and namespace key.
    const KIND: BackendKind;

    /// Construct a connection.
    ///
    /// `persistent_id` is the registry key; backends with persistent
    /// connection support use it to tell instances apart.
    async fn connect(
        &self,
        config: &ConfigMap,
        persistent_id: &str,
    ) -> HarborResult<Self::Connection>;
}

/// How a caller's configuration maps onto connection identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityOptions {
    /// Leave the namespace key out of the identity. The shared instance gets
    /// the caller's namespace re-selected on every acquire.
    pub ignore_namespace: bool,
}

impl IdentityOptions {
    pub fn ignore_namespace() -> Self {
        Self {
            ignore_namespace: true,
        }
    }
}

/// A live connection plus the configuration it was built from.
#[derive(Debug)]
pub struct Pooled<T> {
    handle: T,
    config: ConfigMap,
}

impl<T> Pooled<T> {
    pub fn new(handle: T, config: ConfigMap) -> Self {
        Self { handle, config }
    }

    pub fn handle(&self) -> &T {
        &self.handle
    }

    /// The filtered configuration used at construction time.
    pub fn config(&self) -> &ConfigMap {
        &self.config
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.handle
    }
}

type Slot<T> = Arc<OnceCell<Arc<Pooled<T>>>>;

/// Per-worker registry of pooled connections for one backend kind.
pub struct ResourceRegistry<C: Connector> {
    connector: C,
    catalog: Arc<ConfigCatalog>,
    slots: DashMap<String, Slot<C::Connection>>,
}

impl<C: Connector> ResourceRegistry<C> {
    /// Create a registry resolving named configurations through `catalog`.
    pub fn new(connector: C, catalog: Arc<ConfigCatalog>) -> Self {
        Self {
            connector,
            catalog,
            slots: DashMap::new(),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn catalog(&self) -> &ConfigCatalog {
        &self.catalog
    }

    /// Registry key for a source/label pair, without connecting.
    pub fn key_for(
        &self,
        source: &ConfigSource,
        label: &str,
        options: IdentityOptions,
    ) -> HarborResult<String> {
        let (_, key) = self.resolve(source, label, options)?;
        Ok(key)
    }

    fn resolve(
        &self,
        source: &ConfigSource,
        label: &str,
        options: IdentityOptions,
    ) -> HarborResult<(ConfigMap, String)> {
        let raw = self.catalog.resolve(source)?;
        let config = C::KIND.normalize(&raw);
        let exclude = options
            .ignore_namespace
            .then(|| C::KIND.namespace_key());
        let fingerprint = ConfigFingerprint::of_normalized(&config, exclude);
        Ok((config, format!("{label}{fingerprint}")))
    }

    /// Return the connection registered for `(source, label)`, building it on
    /// first use.
    ///
    /// Construction errors propagate and are not cached; the next call with
    /// the same key tries again.
    pub async fn acquire(
        &self,
        source: &ConfigSource,
        label: &str,
        options: IdentityOptions,
    ) -> HarborResult<Arc<Pooled<C::Connection>>> {
        let (config, key) = self.resolve(source, label, options)?;

        let slot: Slot<C::Connection> = {
            let entry = self
                .slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()));
            Arc::clone(entry.value())
        };

        let mut built = false;
        let pooled = {
            let connector = &self.connector;
            let config = &config;
            let key = key.as_str();
            let built = &mut built;
            slot.get_or_try_init(|| async move {
                tracing::debug!(kind = %C::KIND, key, "building pooled connection");
                let handle = connector.connect(config, key).await?;
                *built = true;
                Ok::<_, harbor_core::HarborError>(Arc::new(Pooled::new(handle, config.clone())))
            })
            .await?
        };

        if options.ignore_namespace && !built {
            // The instance is shared across namespaces: a previous caller may
            // have switched it. A config without a namespace gets the kind's
            // default one.
            let namespace_key = C::KIND.namespace_key();
            let namespace = config
                .get(namespace_key)
                .filter(|value| !value.is_null())
                .cloned()
                .or_else(|| C::KIND.defaults().remove(namespace_key));
            if let Some(namespace) = namespace {
                pooled.select_namespace(&namespace).await?;
            }
        }

        Ok(Arc::clone(pooled))
    }

    /// Whether a live connection is registered under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.slots
            .get(key)
            .map(|slot| slot.initialized())
            .unwrap_or(false)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registered connection (worker shutdown / pool close).
    ///
    /// Handles still held by in-flight requests stay valid until released.
    pub fn close(&self) {
        let count = self.len();
        self.slots.clear();
        tracing::info!(kind = %C::KIND, count, "resource registry closed");
    }
}

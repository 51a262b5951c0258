//! HARBOR API Server Entry Point
//!
//! Loads settings, wires the registries and the cache-aside store, installs
//! error reporting, and starts the Axum HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use harbor_api::telemetry::{init_tracing, install_panic_hook, ErrorReporter, InstrumentedConnector};
use harbor_api::{
    create_router, ApiError, ApiResult, AppState, EntityCatalog, PgConnector, RecordBackend, Settings,
};
use harbor_storage::{CacheAsideStore, RedisConnector, ResourceRegistry};

fn main() -> ApiResult<()> {
    let settings = Settings::from_env()?;
    init_tracing(&settings.log)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.server.workers)
        .enable_all()
        .build()
        .map_err(|e| ApiError::internal_error(format!("Failed to build runtime: {}", e)))?;

    runtime.block_on(serve(settings))
}

async fn serve(settings: Settings) -> ApiResult<()> {
    let settings = Arc::new(settings);
    let catalog = Arc::new(settings.catalog());

    let cache_registry = Arc::new(ResourceRegistry::new(
        InstrumentedConnector::new(RedisConnector),
        Arc::clone(&catalog),
    ));
    let row_registry = Arc::new(ResourceRegistry::new(
        InstrumentedConnector::new(PgConnector::from_settings(&settings.database)),
        catalog,
    ));
    let records: Arc<dyn RecordBackend> =
        Arc::new(CacheAsideStore::new(cache_registry, row_registry));

    let reporter = Arc::new(ErrorReporter::from_settings(&settings));
    install_panic_hook(Arc::clone(&reporter));

    let entities = EntityCatalog::new(settings.entity_defs());
    tracing::info!(entities = entities.len(), "Entity catalog loaded");

    let state = AppState::new(Arc::clone(&records), entities, reporter, Arc::clone(&settings));
    let app = create_router(state);

    let addr = settings.bind_addr()?;
    tracing::info!(%addr, workers = settings.server.workers, "Starting HARBOR API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    records.close();
    tracing::info!("Connections released");
    Ok(())
}

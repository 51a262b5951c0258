#![allow(dead_code)]
//! Shared router fixtures for the HTTP tests.

use std::path::Path;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use harbor_api::{
    create_router, telemetry::ErrorReporter, AppState, EntityCatalog, RecordBackend, Settings,
};
use harbor_test_utils::fixtures::{test_store, user_entity, TestStore};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

/// Settings writing logs and cache files under `dir`.
pub fn test_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.log.path = dir.join("logs");
    settings.cache.path = dir.join("cache");
    settings
}

/// A router over `records`, serving the `User` entity.
pub fn router_over(records: Arc<dyn RecordBackend>, dir: &Path) -> (Router, Arc<ErrorReporter>) {
    let settings = Arc::new(test_settings(dir));
    let reporter = Arc::new(ErrorReporter::from_settings(&settings));
    let entities = EntityCatalog::new([user_entity()]);
    let state = AppState::new(records, entities, Arc::clone(&reporter), settings);
    (create_router(state), reporter)
}

pub struct TestApp {
    pub router: Router,
    pub backends: TestStore,
    pub reporter: Arc<ErrorReporter>,
    pub dir: TempDir,
}

/// The full router over in-memory backends.
pub fn test_app() -> std::io::Result<TestApp> {
    let dir = tempfile::tempdir()?;
    let backends = test_store();
    let (router, reporter) = router_over(Arc::new(backends.store.clone()), dir.path());
    Ok(TestApp {
        router,
        backends,
        reporter,
        dir,
    })
}

/// Send one request and return the status with the JSON body
/// (`Value::Null` when the body is not JSON).
pub async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let request = match builder.body(body) {
        Ok(request) => request,
        Err(e) => panic!("invalid test request {uri}: {e}"),
    };

    let response = match router.clone().oneshot(request).await {
        Ok(response) => response,
        Err(e) => match e {},
    };
    let status = response.status();
    let bytes = match to_bytes(response.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => panic!("failed to read body of {uri}: {e}"),
    };
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

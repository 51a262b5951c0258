//! Server errors and panics at the HTTP boundary.
//!
//! Clients get the generic message for their error code; the detail goes to
//! the reporter, which alerts once per route and logs the repeats.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::{Method, StatusCode},
    routing::get,
    Router,
};
use harbor_api::{telemetry::LogKind, with_boundary, RecordBackend};
use harbor_core::{HarborResult, RecordId, Row, StorageError};
use harbor_storage::{EntityDef, Loaded, NamespaceOptions, SaveMode, SaveOutcome};

#[path = "support/app.rs"]
mod app_support;
use app_support::{router_over, send};

const SECRET: &str = "password authentication failed for user \"root\"";

/// Backend whose every call fails with a detailed storage error.
struct FailingBackend;

fn failure<T>(operation: &str) -> HarborResult<T> {
    Err(StorageError::QueryFailed {
        operation: operation.to_string(),
        table: "user".to_string(),
        reason: SECRET.to_string(),
    }
    .into())
}

#[async_trait]
impl RecordBackend for FailingBackend {
    async fn load(&self, _: &EntityDef, _: &RecordId, _: &NamespaceOptions) -> HarborResult<Loaded> {
        failure("select")
    }

    async fn save(&self, _: &EntityDef, _: Row, _: Option<Row>, _: SaveMode) -> HarborResult<SaveOutcome> {
        failure("insert")
    }

    async fn invalidate(&self, _: &EntityDef, _: &RecordId, _: &NamespaceOptions) -> HarborResult<bool> {
        failure("delete")
    }

    async fn ping(&self, _: &EntityDef) -> HarborResult<()> {
        failure("ping")
    }
}

#[tokio::test]
async fn test_server_error_body_is_generic() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let (router, _) = router_over(Arc::new(FailingBackend), dir.path());

    let (status, body) = send(&router, Method::GET, "/records/user/1", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "DATABASE_ERROR");
    assert_eq!(body["message"], "The row store could not complete the request");
    assert!(!body.to_string().contains("password"));
    Ok(())
}

#[tokio::test]
async fn test_server_error_is_reported_once_then_logged() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let (router, reporter) = router_over(Arc::new(FailingBackend), dir.path());

    send(&router, Method::GET, "/records/user/1", None).await;
    assert!(reporter.throttle().check_file().exists());
    let error_log = reporter.log().path_for(LogKind::Error, &chrono::Local::now());
    let first = std::fs::read_to_string(&error_log)?;
    assert_eq!(first.lines().count(), 1);
    assert!(first.contains("http:GET /records/"));
    assert!(first.contains("password authentication failed"));

    // Same route again inside the window: no new alert, payload still logged.
    send(&router, Method::GET, "/records/user/2", None).await;
    let second = std::fs::read_to_string(&error_log)?;
    assert_eq!(second.lines().count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_client_errors_are_not_reported() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let (router, reporter) = router_over(Arc::new(FailingBackend), dir.path());

    let (status, _) = send(&router, Method::GET, "/records/nobody/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!reporter.throttle().check_file().exists());
    Ok(())
}

#[tokio::test]
async fn test_readiness_hides_backend_detail() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let (router, _) = router_over(Arc::new(FailingBackend), dir.path());

    let (status, body) = send(&router, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert!(!body.to_string().contains("password"));
    Ok(())
}

#[tokio::test]
async fn test_panic_becomes_generic_500() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let (_, reporter) = router_over(Arc::new(FailingBackend), dir.path());
    let router = with_boundary(
        Router::new().route(
            "/boom",
            get(|| async {
                if true {
                    panic!("{}", SECRET);
                }
                "unreachable"
            }),
        ),
        reporter,
    );

    let (status, body) = send(&router, Method::GET, "/boom", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "INTERNAL_ERROR");
    assert!(!body.to_string().contains("password"));
    Ok(())
}

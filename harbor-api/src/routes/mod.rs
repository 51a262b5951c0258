//! HTTP routes.
//!
//! - /health/*  liveness and readiness
//! - /metrics   Prometheus scrape endpoint
//! - /records/* cache-aside record access

use std::any::Any;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;
use crate::telemetry::{error_report_middleware, metrics_handler, observability_middleware, ErrorReporter};

pub mod health;
pub mod records;

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
    let reporter = state.reporter.clone();
    let router = Router::new()
        .nest("/health", health::create_router())
        .nest("/records", records::create_router())
        .route("/metrics", get(metrics_handler))
        .with_state(state);
    with_boundary(router, reporter)
}

/// Wrap a router in the request boundary.
///
/// Innermost first: panics become a generic 500, server errors are
/// reported, then metrics and request tracing.
pub fn with_boundary(router: Router, reporter: Arc<ErrorReporter>) -> Router {
    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(from_fn_with_state(reporter, error_report_middleware))
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
}

/// The panic hook has already reported the panic; the client only gets the
/// generic body.
fn handle_panic(_payload: Box<dyn Any + Send + 'static>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError::from_code(ErrorCode::InternalError)),
    )
        .into_response()
}

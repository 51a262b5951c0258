//! Axum Middleware for HTTP Request Tracing, Metrics and Error Reporting
//!
//! Provides automatic instrumentation of all HTTP requests with:
//! - Tracing spans and a completion log line
//! - Prometheus metrics collection
//! - Throttled reporting of server errors

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info_span, Instrument};

use super::metrics::METRICS;
use super::report::{ErrorReport, ErrorReporter};
use crate::error::ApiError;
use crate::extractors::RequestContext;

static UUID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("Invalid UUID regex")
});

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").expect("Invalid ID regex"));

/// Normalize path for metrics/spans (replace UUIDs and IDs with placeholders).
///
/// This prevents high-cardinality label explosion in Prometheus.
pub fn normalize_path(path: &str) -> String {
    let result = UUID_PATTERN.replace_all(path, "{id}");
    let result = ID_PATTERN.replace_all(&result, "/{id}$1");
    result.to_string()
}

/// Route template when routing matched, else the normalized path.
fn route_of(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| normalize_path(request.uri().path()))
}

/// Span, request metrics and a completion line for every request.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = route_of(&request);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %route,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_http_request(method.as_str(), &route, status.as_u16(), duration.as_secs_f64());
    }

    tracing::info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = duration.as_millis(),
        "request served"
    );

    response
}

/// Report every 5xx [`ApiError`] through the throttled reporter.
///
/// The request context is created here and stored in the request extensions,
/// so handlers extracting [`RequestContext`] see the same request id.
pub async fn error_report_middleware(
    State(reporter): State<Arc<ErrorReporter>>,
    request: Request,
    next: Next,
) -> Response {
    let route = route_of(&request);
    let (mut parts, body) = request.into_parts();
    let context = RequestContext::from_parts(&parts);
    parts.extensions.insert(context.clone());

    let response = next.run(Request::from_parts(parts, body)).await;

    if response.status().is_server_error() {
        if let Some(err) = response.extensions().get::<ApiError>() {
            tracing::error!(
                request_id = %context.request_id,
                code = %err.code,
                error = %err.message,
                "Request failed"
            );
            let report = ErrorReport::from_api_error(err, &context, &route);
            reporter.report_async(report).await;
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/records/session/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/records/session/{id}");
    }

    #[test]
    fn test_normalize_path_numeric_id() {
        assert_eq!(normalize_path("/records/user/12345"), "/records/user/{id}");
    }

    #[test]
    fn test_normalize_path_nested() {
        assert_eq!(
            normalize_path("/records/user/66/cache"),
            "/records/user/{id}/cache"
        );
    }

    #[test]
    fn test_normalize_path_health() {
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
    }
}

//! Prometheus metrics.
//!
//! Everything registers into the default registry on first use of
//! [`METRICS`]; `/metrics` gathers from it.

use async_trait::async_trait;
use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
};
use harbor_core::{BackendKind, ConfigMap, HarborResult};
use harbor_storage::{Connector, LoadSource};
use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder};

use crate::error::{ApiError, ApiResult};

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Request latency buckets in seconds, 1ms to 10s.
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

pub static METRICS: Lazy<ApiResult<HarborMetrics>> = Lazy::new(HarborMetrics::new);

/// Every metric the service exports.
#[derive(Clone)]
pub struct HarborMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Cache-aside lookups - labels: entity, source (cache/row_store/absent)
    pub cache_lookups_total: CounterVec,

    /// Registry connection builds - labels: kind, status
    pub connections_built_total: CounterVec,

    /// Throttled alerts - labels: outcome (emitted/suppressed)
    pub alerts_total: CounterVec,
}

fn register_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

impl HarborMetrics {
    /// Register the metrics. Fails if they are already registered.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "harbor_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| register_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "harbor_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| register_error("http_request_duration_seconds", e))?,

            cache_lookups_total: register_counter_vec!(
                "harbor_cache_lookups_total",
                "Cache-aside lookups by where the answer came from",
                &["entity", "source"]
            )
            .map_err(|e| register_error("cache_lookups_total", e))?,

            connections_built_total: register_counter_vec!(
                "harbor_connections_built_total",
                "Connections constructed by the resource registries",
                &["kind", "status"]
            )
            .map_err(|e| register_error("connections_built_total", e))?,

            alerts_total: register_counter_vec!(
                "harbor_alerts_total",
                "Error alerts by throttle outcome",
                &["outcome"]
            )
            .map_err(|e| register_error("alerts_total", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status_str.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record where a cache-aside load was answered from.
    pub fn record_cache_lookup(&self, entity: &str, source: LoadSource) {
        let source = match source {
            LoadSource::Cache => "cache",
            LoadSource::RowStore => "row_store",
            LoadSource::Absent => "absent",
        };
        self.cache_lookups_total
            .with_label_values(&[entity, source])
            .inc();
    }

    /// Record a connection construction attempt.
    pub fn record_connection_built(&self, kind: BackendKind, success: bool) {
        let kind = kind.to_string();
        let status = if success { "success" } else { "error" };
        self.connections_built_total
            .with_label_values(&[kind.as_str(), status])
            .inc();
    }

    /// Record a throttle decision.
    pub fn record_alert(&self, emitted: bool) {
        let outcome = if emitted { "emitted" } else { "suppressed" };
        self.alerts_total.with_label_values(&[outcome]).inc();
    }
}

// ============================================================================
// INSTRUMENTED CONNECTOR
// ============================================================================

/// Counts every connection a registry builds through the wrapped connector.
#[derive(Debug, Clone)]
pub struct InstrumentedConnector<C> {
    inner: C,
}

impl<C> InstrumentedConnector<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: Connector> Connector for InstrumentedConnector<C> {
    type Connection = C::Connection;
    const KIND: BackendKind = C::KIND;

    async fn connect(&self, config: &ConfigMap, persistent_id: &str) -> HarborResult<Self::Connection> {
        let result = self.inner.connect(config, persistent_id).await;
        if let Ok(metrics) = METRICS.as_ref() {
            metrics.record_connection_built(C::KIND, result.is_ok());
        }
        result
    }
}

/// GET /metrics in the Prometheus text format.
pub async fn metrics_handler() -> Response {
    let mut body = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut body) {
        tracing::error!(error = %e, "metrics encoding failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(CONTENT_TYPE, TEXT_FORMAT)], body).into_response()
}

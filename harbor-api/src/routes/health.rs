//! Probes for orchestrators and load balancers.
//!
//! `/health/ping` and `/health/live` only prove the process answers.
//! `/health/ready` touches every entity's row store and cache plus the local
//! file cache.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use harbor_storage::{CacheDriver, CacheValue};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Key written and removed by the file cache probe.
const PROBE_KEY: &str = "harbor:readiness-probe";

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDetails {
    /// One entry per configured entity, covering its row store and cache.
    pub backends: BTreeMap<String, ComponentHealth>,
    pub file_cache: ComponentHealth,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn from_check(result: Result<u64, String>) -> Self {
        match result {
            Ok(latency) => Self {
                status: HealthStatus::Healthy,
                latency_ms: Some(latency),
                error: None,
            },
            Err(e) => Self {
                status: HealthStatus::Unhealthy,
                latency_ms: None,
                error: Some(e),
            },
        }
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("harbor is running".to_string()),
        details: None,
    })
}

/// GET /health/ready
///
/// Every entity's backends must answer and the file cache directory must
/// accept a write. Failing backends make the service unhealthy; a failing
/// file cache only degrades it. Failure detail goes to the log, not the body.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let mut backends = BTreeMap::new();
    for entity in state.entities.iter() {
        let start = Instant::now();
        let result = state
            .records
            .ping(entity)
            .await
            .map(|_| elapsed_ms(start))
            .map_err(|e| {
                tracing::warn!(entity = entity.name(), error = %e, "Readiness backend check failed");
                "Backend check failed".to_string()
            });
        backends.insert(entity.name().to_string(), ComponentHealth::from_check(result));
    }

    let file_cache = ComponentHealth::from_check(check_file_cache(&state).await);

    let backends_healthy = backends.values().all(|c| c.status == HealthStatus::Healthy);
    let overall_status = if !backends_healthy {
        HealthStatus::Unhealthy
    } else if file_cache.status != HealthStatus::Healthy {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let response = HealthResponse {
        status: overall_status,
        message: None,
        details: Some(HealthDetails {
            backends,
            file_cache,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    };

    let status_code = if overall_status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(response))
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn probe_failed(operation: &str, err: harbor_core::HarborError) -> String {
    tracing::warn!(operation, error = %err, "Readiness file cache probe failed");
    format!("File cache {} failed", operation)
}

async fn check_file_cache(state: &AppState) -> Result<u64, String> {
    let start = Instant::now();
    let cache = &state.file_cache;
    let probe = CacheValue::from("ok");

    cache
        .set(PROBE_KEY, &probe, Some(60))
        .await
        .map_err(|e| probe_failed("write", e))?;
    let read = cache
        .get(PROBE_KEY)
        .await
        .map_err(|e| probe_failed("read", e))?;
    cache
        .remove(PROBE_KEY)
        .await
        .map_err(|e| probe_failed("remove", e))?;

    if read.as_ref() != Some(&probe) {
        return Err("File cache returned a different value".to_string());
    }
    Ok(elapsed_ms(start))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
}

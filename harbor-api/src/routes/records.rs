//! Record Endpoints
//!
//! Thin HTTP surface over the cache-aside store:
//! - GET    /records/:entity/:id        read-through load
//! - POST   /records/:entity            insert
//! - PUT    /records/:entity/:id        update by primary key
//! - DELETE /records/:entity/:id/cache  drop the cached copy

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use harbor_core::Row;
use harbor_storage::{EntityDef, NamespaceOptions, SaveMode, SaveOutcome};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::extractors::{RecordPath, RequestContext};
use crate::state::{AppState, EntityCatalog};
use crate::telemetry::METRICS;

// ============================================================================
// TYPES
// ============================================================================

/// Optional cache namespace overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheQuery {
    pub db: Option<i64>,
    pub prefix: Option<String>,
}

impl From<CacheQuery> for NamespaceOptions {
    fn from(query: CacheQuery) -> Self {
        NamespaceOptions {
            db: query.db,
            prefix: query.prefix.filter(|p| !p.is_empty()),
        }
    }
}

fn resolve(entities: &EntityCatalog, name: &str) -> ApiResult<Arc<EntityDef>> {
    entities
        .get(name)
        .ok_or_else(|| ApiError::entity_not_found(name))
}

fn object_body(body: Value) -> ApiResult<Row> {
    match body {
        Value::Object(row) => Ok(row),
        _ => Err(ApiError::invalid_input("Request body must be a JSON object")),
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /records/:entity/:id
pub async fn get_record(
    State(state): State<AppState>,
    context: RequestContext,
    path: RecordPath,
    Query(query): Query<CacheQuery>,
) -> ApiResult<impl IntoResponse> {
    let entity = resolve(&state.entities, &path.entity)?;
    let loaded = state
        .records
        .load(&entity, &path.id, &query.into())
        .await?;

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_cache_lookup(entity.name(), loaded.source);
    }
    tracing::debug!(
        request_id = %context.request_id,
        entity = entity.name(),
        id = %path.id,
        source = ?loaded.source,
        "record loaded"
    );

    let row = loaded
        .row
        .ok_or_else(|| ApiError::record_not_found(entity.name(), &path.id))?;
    Ok(Json(Value::Object(row)))
}

/// POST /records/:entity
pub async fn create_record(
    State(state): State<AppState>,
    context: RequestContext,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let entity = resolve(&state.entities, &name)?;
    let data = object_body(body)?;

    let outcome = state
        .records
        .save(&entity, data, None, SaveMode::Insert)
        .await?;
    let id = match outcome {
        SaveOutcome::Inserted(id) | SaveOutcome::Replaced(id) => id,
        SaveOutcome::Updated(_) => {
            return Err(ApiError::internal_error("insert reported an update"));
        }
    };

    tracing::info!(
        request_id = %context.request_id,
        entity = entity.name(),
        id = %id,
        "record created"
    );
    Ok((StatusCode::CREATED, Json(json!({ "id": id.to_json() }))))
}

/// PUT /records/:entity/:id
///
/// The path id overrides any primary key in the body.
pub async fn update_record(
    State(state): State<AppState>,
    context: RequestContext,
    path: RecordPath,
    Json(body): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let entity = resolve(&state.entities, &path.entity)?;
    let mut data = object_body(body)?;
    data.insert(entity.pk().to_string(), path.id.to_json());

    let affected = match state
        .records
        .save(&entity, data, None, SaveMode::Update)
        .await?
    {
        SaveOutcome::Updated(n) => n,
        SaveOutcome::Inserted(_) | SaveOutcome::Replaced(_) => {
            return Err(ApiError::internal_error("update reported an insert"));
        }
    };

    tracing::info!(
        request_id = %context.request_id,
        entity = entity.name(),
        id = %path.id,
        affected,
        "record updated"
    );
    Ok(Json(json!({ "affected": affected })))
}

/// DELETE /records/:entity/:id/cache
pub async fn invalidate_record(
    State(state): State<AppState>,
    context: RequestContext,
    path: RecordPath,
    Query(query): Query<CacheQuery>,
) -> ApiResult<impl IntoResponse> {
    let entity = resolve(&state.entities, &path.entity)?;
    let id = path.id;

    let invalidated = state
        .records
        .invalidate(&entity, &id, &query.into())
        .await?;

    tracing::debug!(
        request_id = %context.request_id,
        entity = entity.name(),
        id = %id,
        invalidated,
        "cache entry dropped"
    );
    Ok(Json(json!({ "invalidated": invalidated })))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/:entity", post(create_record))
        .route("/:entity/:id", get(get_record).put(update_record))
        .route("/:entity/:id/cache", delete(invalidate_record))
}

//! Path extractor for `/:entity/:id` routes.
//!
//! Rejects malformed ids with a 400 before any backend is touched.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path},
    http::request::Parts,
};
use harbor_core::RecordId;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ApiError;

static RECORD_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:-]{1,64}$").expect("Invalid record id regex"));

/// Entity name and record id taken from the path.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPath {
    pub entity: String,
    pub id: RecordId,
}

/// Parse a path segment into a record id.
pub fn parse_record_id(raw: &str) -> Result<RecordId, ApiError> {
    if !RECORD_ID.is_match(raw) {
        return Err(ApiError::invalid_format(
            "id",
            "1-64 characters of letters, digits, '_', '.', ':' or '-'",
        ));
    }
    Ok(RecordId::parse(raw))
}

#[async_trait]
impl<S> FromRequestParts<S> for RecordPath
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path((entity, raw_id)) = Path::<(String, String)>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::invalid_input(e.body_text()))?;
        Ok(Self {
            entity,
            id: parse_record_id(&raw_id)?,
        })
    }
}

//! HTTP-facing errors.
//!
//! Handlers return [`ApiResult`]; an [`ApiError`] renders as a JSON body of
//! `{code, message, details}` with the status its [`ErrorCode`] maps to.
//!
//! Server-side failures (5xx) are answered with the code's fixed message
//! only. The full error travels in the response extensions so the reporting
//! middleware can log and alert on it.

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use harbor_core::{ConnectionError, HarborError, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Machine-readable failure category, serialized as `SCREAMING_SNAKE_CASE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // 400
    InvalidInput,
    MissingField,
    /// A path segment or field did not match its expected shape.
    InvalidFormat,

    // 404
    /// The entity name is not in the catalog.
    EntityNotFound,
    RecordNotFound,

    // 5xx
    InternalError,
    DatabaseError,
    CacheError,
    /// A backend could not be reached.
    ServiceUnavailable,
    /// A backend did not answer within its configured timeout.
    Timeout,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        use ErrorCode::*;
        match self {
            InvalidInput | MissingField | InvalidFormat => StatusCode::BAD_REQUEST,
            EntityNotFound | RecordNotFound => StatusCode::NOT_FOUND,
            InternalError | DatabaseError | CacheError => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Fixed message; the only text a client sees for server errors.
    pub fn default_message(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            InvalidInput => "The request was not understood",
            MissingField => "A required field was not supplied",
            InvalidFormat => "A value has the wrong shape",
            EntityNotFound => "No such entity",
            RecordNotFound => "No such record",
            InternalError => "Something went wrong on our side",
            DatabaseError => "The row store could not complete the request",
            CacheError => "The cache could not complete the request",
            ServiceUnavailable => "A backend is unavailable, try again later",
            Timeout => "A backend took too long to answer",
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Error body returned by every handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Error carrying only the code's fixed message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    /// The body a client is allowed to see.
    ///
    /// Client errors are returned as-is; server errors lose their message and
    /// details.
    pub fn public(&self) -> ApiError {
        if self.code.is_server_error() {
            ApiError::from_code(self.code)
        } else {
            self.clone()
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorCode::MissingField, format!("Field '{field}' is required"))
            .with_details(serde_json::json!({ "field": field }))
    }

    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("'{field}' must be {expected}"),
        )
    }

    /// The entity name is not configured.
    pub fn entity_not_found(entity: &str) -> Self {
        Self::new(
            ErrorCode::EntityNotFound,
            format!("Entity '{entity}' is not configured"),
        )
    }

    pub fn record_not_found(entity: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{entity} {id} does not exist"),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status_code(), Json(self.public())).into_response();
        // Unredacted copy for error_report_middleware.
        response.extensions_mut().insert(self);
        response
    }
}

impl From<HarborError> for ApiError {
    fn from(err: HarborError) -> Self {
        let message = err.to_string();
        let code = match &err {
            HarborError::Connection(ConnectionError::Timeout { .. }) => ErrorCode::Timeout,
            HarborError::Connection(_) => ErrorCode::ServiceUnavailable,
            HarborError::Storage(StorageError::InvalidIdentifier { .. }) => ErrorCode::InvalidInput,
            HarborError::Storage(StorageError::MissingPrimaryKey { pk, .. }) => {
                return Self::missing_field(pk);
            }
            HarborError::Storage(StorageError::Cache { .. }) => ErrorCode::CacheError,
            HarborError::Storage(_) => ErrorCode::DatabaseError,
            HarborError::Config(_) | HarborError::Io { .. } => ErrorCode::InternalError,
        };
        Self::new(code, message)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

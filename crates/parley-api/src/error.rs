use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{debug, error};

use parley_db::StoreError;
use parley_types::api::ErrorBody;

/// Every failure a handler can return. Each kind maps to one status code
/// and a `{"error": ...}` body.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or missing fields, self-chat, bad content
    #[error("{0}")]
    Validation(String),

    /// Credential mismatch
    #[error("{0}")]
    Unauthorized(String),

    /// Unknown chat, user or participant
    #[error("{0}")]
    NotFound(String),

    /// Uniqueness violation (e.g. username taken)
    #[error("{0}")]
    Conflict(String),

    /// Storage or transport failure, including timeouts
    #[error("{0}")]
    Unavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(msg) => Self::Validation(msg),
            StoreError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Unavailable(msg) => Self::Unavailable(msg),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            // Don't leak storage internals to clients
            Self::Unavailable(detail) => {
                error!("Request failed: {}", detail);
                let body = ErrorBody {
                    error: "service unavailable".into(),
                };
                return (status, Json(body)).into_response();
            }
            other => debug!("Request rejected ({}): {}", status, other),
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

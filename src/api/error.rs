//! Error responses for the admin API

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Result type for admin API handlers
pub type Result<T> = std::result::Result<T, ApiError>;

/// A failed admin request
///
/// The display text is the short message returned to the caller; details of
/// downstream failures are logged, not sent.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed request or parameters
    #[error("{0}")]
    BadRequest(String),

    /// Missing, malformed or rejected credentials
    #[error("{0}")]
    Unauthorized(String),

    /// Request method not accepted
    #[error("method is not allowed")]
    MethodNotAllowed,

    /// A cluster call failed
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

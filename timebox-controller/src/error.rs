//! API error responses
//!
//! Every handler error is rendered as the same JSON envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use timebox_common::Error;
use tracing::error;

/// JSON error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status code
    pub status: u16,

    /// Machine-readable error code
    pub error: String,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(status: u16, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: message.into(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug)]
pub enum ApiError {
    /// 500
    Internal(String),

    /// 404
    NotFound(String),

    /// 401
    AuthenticationFailed,

    /// 400
    BadRequest(String),

    /// 409
    Conflict(String),

    /// 422
    ValidationError(String),

    /// 503
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            ApiError::Internal(msg) => {
                error!("Internal API error: {}", msg);
                ErrorResponse::new(500, "INTERNAL_ERROR", "An internal server error occurred")
                    .with_details(msg)
            }
            ApiError::NotFound(msg) => ErrorResponse::new(404, "NOT_FOUND", msg),
            ApiError::AuthenticationFailed => ErrorResponse::new(
                401,
                "AUTHENTICATION_FAILED",
                "Authentication credentials are invalid or missing",
            ),
            ApiError::BadRequest(msg) => ErrorResponse::new(400, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => ErrorResponse::new(409, "CONFLICT", msg),
            ApiError::ValidationError(msg) => ErrorResponse::new(422, "VALIDATION_ERROR", msg),
            ApiError::ServiceUnavailable(msg) => {
                ErrorResponse::new(503, "SERVICE_UNAVAILABLE", msg)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = self.to_error_response();
        let status =
            StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::ResourceNotFound(id) => {
                ApiError::NotFound(format!("Resource '{}' is not tracked", id))
            }
            Error::AlreadyRegistered(id) => {
                ApiError::Conflict(format!("Resource '{}' is already registered", id))
            }
            Error::InvalidSchedule(e) => ApiError::ValidationError(e.to_string()),
            Error::Validation(msg) => ApiError::ValidationError(msg),
            Error::Storage(msg) => ApiError::ServiceUnavailable(format!("State store: {}", msg)),
            Error::System(msg) => ApiError::Internal(msg),
            Error::Io(e) => ApiError::Internal(format!("I/O error: {}", e)),
        }
    }
}

//! HTTP request handlers for the Herald API.
//!
//! Handlers follow a consistent pattern: input validation with
//! appropriate error codes, tracing for observability, and
//! standardized JSON error responses.

pub mod health;
pub mod notifications;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use herald_core::CoreError;
use serde::Serialize;

pub use health::{health_check, liveness_check, readiness_check};
pub use notifications::{create_notification, get_notification, list_user_notifications};

/// Standardized JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
}

/// API-level errors mapped to HTTP status codes.
#[derive(Debug)]
pub enum ApiError {
    /// Persistence failure.
    Database(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Request payload failed validation.
    InvalidInput(String),
    /// The record was stored but could not be enqueued for delivery.
    PublishFailed(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(msg) => Self::NotFound(msg),
            CoreError::InvalidInput(msg) | CoreError::ConstraintViolation(msg) => {
                Self::InvalidInput(msg)
            },
            CoreError::Database(msg) => Self::Database(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Database(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::InvalidInput(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            Self::PublishFailed(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

//! Session coordinator error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! for 5xx errors are generic; the underlying cause is logged server-side.
//! AI failures never appear here: they are absorbed by the summarization
//! worker (see `services::summarizer`).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Session coordinator error type.
///
/// Maps to HTTP status codes:
/// - NotFound: 404 Not Found
/// - Unauthorized: 401 Unauthorized
/// - InvalidTransition: 409 Conflict
/// - MeetingEnded: 410 Gone
/// - BadRequest: 400 Bad Request
/// - Configuration, Database, Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Meeting ended: {0}")]
    MeetingEnded(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            CoordinatorError::NotFound(_) => 404,
            CoordinatorError::Unauthorized(_) => 401,
            CoordinatorError::InvalidTransition(_) => 409,
            CoordinatorError::MeetingEnded(_) => 410,
            CoordinatorError::BadRequest(_) => 400,
            CoordinatorError::Configuration(_)
            | CoordinatorError::Database(_)
            | CoordinatorError::Internal(_) => 500,
        }
    }

    /// Machine-readable error code returned to clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoordinatorError::NotFound(_) => "NOT_FOUND",
            CoordinatorError::Unauthorized(_) => "UNAUTHORIZED",
            CoordinatorError::InvalidTransition(_) => "INVALID_TRANSITION",
            CoordinatorError::MeetingEnded(_) => "MEETING_ENDED",
            CoordinatorError::BadRequest(_) => "INVALID_REQUEST",
            CoordinatorError::Configuration(_) => "CONFIGURATION_ERROR",
            CoordinatorError::Database(_) => "DATABASE_ERROR",
            CoordinatorError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Bounded label for metrics.
    pub fn metric_label(&self) -> &'static str {
        match self {
            CoordinatorError::NotFound(_) => "not_found",
            CoordinatorError::Unauthorized(_) => "unauthorized",
            CoordinatorError::InvalidTransition(_) => "invalid_transition",
            CoordinatorError::MeetingEnded(_) => "meeting_ended",
            CoordinatorError::BadRequest(_) => "bad_request",
            CoordinatorError::Configuration(_) => "configuration",
            CoordinatorError::Database(_) => "database",
            CoordinatorError::Internal(_) => "internal",
        }
    }

    /// Client-safe message. Server-side detail is logged, never returned.
    pub fn client_message(&self) -> String {
        match self {
            CoordinatorError::NotFound(msg)
            | CoordinatorError::Unauthorized(msg)
            | CoordinatorError::InvalidTransition(msg)
            | CoordinatorError::MeetingEnded(msg)
            | CoordinatorError::BadRequest(msg) => msg.clone(),
            CoordinatorError::Configuration(_) => {
                "The service is not configured to complete this request".to_string()
            }
            CoordinatorError::Database(_) => "An internal database error occurred".to_string(),
            CoordinatorError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: ErrorDetail,
}

#[derive(Serialize)]
pub(crate) struct ErrorDetail {
    pub(crate) code: String,
    pub(crate) message: String,
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        match &self {
            CoordinatorError::Configuration(detail) => {
                // Missing signing or service credentials: fatal for the request, never silent
                tracing::error!(target: "sc.config", detail = %detail, "Configuration error");
            }
            CoordinatorError::Database(err) => {
                tracing::error!(target: "sc.database", error = %err, "Database operation failed");
            }
            CoordinatorError::Internal(err) => {
                tracing::error!(target: "sc.internal", error = %err, "Internal error");
            }
            _ => {}
        }

        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"session-coordinator\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

/// Convert sqlx errors to CoordinatorError
impl From<sqlx::Error> for CoordinatorError {
    fn from(err: sqlx::Error) -> Self {
        CoordinatorError::Database(err.to_string())
    }
}

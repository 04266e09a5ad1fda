//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use beacon_core::BeaconError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - Resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details (not exposed to client in production).
        details: Option<String>,
    },

    /// 502 Bad Gateway - The external sync sink refused or could not be reached.
    UpstreamFailure {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional additional details.
        details: Option<String>,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "validation_error",
    "message": "Validation failed: radius must be a positive number of meters (got -5)",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "device_not_found").
    #[schema(example = "validation_error")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Validation failed: radius must be a positive number of meters (got -5)")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Shorthand for a 400 with a fixed code.
    pub fn bad_request(error_code: &str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            error_code: error_code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::BadRequest { error_code, message } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::NotFound { error_code, message } => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: error_code,
                        message,
                        details: details.map(|d| serde_json::json!(d)),
                    },
                )
            }

            Self::UpstreamFailure {
                error_code,
                message,
                details,
            } => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: details.map(|d| serde_json::json!(d)),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::InternalError { message, .. } => {
                write!(f, "Internal Error: {message}")
            }
            Self::UpstreamFailure { message, .. } => {
                write!(f, "Upstream Failure: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from beacon_core errors.
impl From<BeaconError> for ApiError {
    fn from(err: BeaconError) -> Self {
        let error_code = err.error_code().to_ascii_lowercase();
        let message = err.to_string();

        match &err {
            BeaconError::Validation(_) => Self::BadRequest {
                error_code,
                message,
            },
            BeaconError::DeviceNotFound(_) | BeaconError::GeofenceNotFound(_) => {
                Self::NotFound {
                    error_code,
                    message,
                }
            }
            BeaconError::SyncFailure {
                device_id,
                attempts,
                ..
            } => Self::UpstreamFailure {
                error_code,
                message,
                details: Some(format!("device {device_id} after {attempts} attempts")),
            },
            BeaconError::ConfigParseError(_)
            | BeaconError::ConfigValidationError(_)
            | BeaconError::PersistenceError(_)
            | BeaconError::IoError(_) => Self::InternalError {
                error_code,
                message,
                details: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_error() {
        let err = ApiError::bad_request("test_error", "Test message");
        assert!(err.to_string().contains("Bad Request"));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error: "test_error".to_string(),
            message: "Test message".to_string(),
            details: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("test_error"));
    }

    #[test]
    fn test_core_error_mapping() {
        let err = ApiError::from(BeaconError::validation("bad radius"));
        assert!(matches!(
            err,
            ApiError::BadRequest { ref error_code, .. } if error_code == "validation_error"
        ));

        let err = ApiError::from(BeaconError::DeviceNotFound("D9".into()));
        assert!(matches!(
            err,
            ApiError::NotFound { ref error_code, .. } if error_code == "device_not_found"
        ));

        let err = ApiError::from(BeaconError::PersistenceError("disk full".into()));
        assert!(matches!(err, ApiError::InternalError { .. }));
    }
}

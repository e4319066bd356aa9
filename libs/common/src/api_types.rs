//! Shared API envelope types
//!
//! Every HTTP endpoint answers with `{success: true, data}` or
//! `{success: false, error}`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use errors::ErrorInfo;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

fn bool_true() -> bool {
    true
}

// ============================================================================
// Standard API Response Models
// ============================================================================

/// Standard success response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct SuccessResponse<T> {
    /// Success indicator (always true)
    #[serde(default = "bool_true")]
    pub success: bool,
    pub data: T,
    /// Additional metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the response
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Standard error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false
    #[serde(default)]
    pub success: bool,
    pub error: ErrorInfo,
}

/// Service status reported by `/health`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    /// Some devices are unreachable
    Degraded,
    Unhealthy,
}

/// Health check payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct HealthStatus {
    pub status: ServiceStatus,
    pub service: String,
    pub version: String,
    /// Seconds since start
    pub uptime: u64,
    pub devices: usize,
    pub devices_in_error: usize,
}

// ============================================================================
// AppError - HTTP Error with proper status codes (requires axum feature)
// ============================================================================

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

/// Application error with HTTP status code
#[cfg(feature = "axum")]
#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub error: ErrorInfo,
}

#[cfg(feature = "axum")]
impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ErrorInfo::new(message).with_code(400),
        }
    }
}

#[cfg(feature = "axum")]
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                success: false,
                error: self.error,
            }),
        )
            .into_response()
    }
}

#[cfg(feature = "axum")]
impl From<errors::ColdroomError> for AppError {
    fn from(err: errors::ColdroomError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            error: err.to_error_info(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_success_response_creation() {
        let response = SuccessResponse::new("test data");
        assert_eq!(response.data, "test data");
        assert!(response.metadata.is_empty());

        let response_with_metadata =
            SuccessResponse::new("test").with_metadata("devices", serde_json::json!(3));
        assert_eq!(response_with_metadata.metadata.len(), 1);
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            success: false,
            error: ErrorInfo::new("Field not found: nope").with_code(404),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], 404);
    }

    #[cfg(feature = "axum")]
    #[test]
    fn test_app_error_from_domain_error() {
        let err: AppError = errors::ColdroomError::DeviceNotFound(9).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.error.kind.as_deref(), Some("DEVICE_NOT_FOUND"));

        let err: AppError = errors::ColdroomError::Timeout("10.0.0.5:502".into()).into();
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_service_status_serialization() {
        let json = serde_json::to_string(&ServiceStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }
}

//! Unified error handling for the cold-room gateway
//!
//! Every crate in the workspace returns [`ColdroomError`] so that the codec,
//! the Modbus transport, the stores and the HTTP layer agree on one set of
//! failure kinds and one HTTP mapping.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// ErrorInfo - API error response type
// ============================================================================

/// Standard error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code (HTTP status)
    pub code: u16,
    /// Stable machine-readable kind, e.g. `FIELD_NOT_FOUND`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Error message
    pub message: String,
    /// Detailed error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Field-specific errors for validation
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub field_errors: HashMap<String, Vec<String>>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: 500,
            kind: None,
            message: message.into(),
            details: None,
            field_errors: HashMap::new(),
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Add a field error
    pub fn add_field_error(mut self, field: impl Into<String>, error: impl Into<String>) -> Self {
        self.field_errors
            .entry(field.into())
            .or_default()
            .push(error.into());
        self
    }
}

// ============================================================================
// ColdroomError - Main error type
// ============================================================================

/// Main error type for the cold-room gateway
#[derive(Debug, Error)]
pub enum ColdroomError {
    // ======================================
    // Memory map & codec errors
    // ======================================
    #[error("Decode error: expected {expected} registers, got {actual}")]
    Decode { expected: usize, actual: usize },

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Invalid tag query: {0}")]
    InvalidTagQuery(String),

    #[error("Memory map load failed: {0}")]
    SchemaLoad(String),

    #[error("Data type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        value: String,
        min: String,
        max: String,
    },

    // ======================================
    // Configuration errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // Network errors
    // ======================================
    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ======================================
    // Protocol errors
    // ======================================
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Modbus exception: function 0x{function:02X}, code 0x{code:02X}")]
    ModbusException { function: u8, code: u8 },

    // ======================================
    // Store errors
    // ======================================
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    // ======================================
    // API & resource errors
    // ======================================
    #[error("Device not found: {0}")]
    DeviceNotFound(i64),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    // ======================================
    // Runtime errors
    // ======================================
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ColdroomError
pub type Result<T> = std::result::Result<T, ColdroomError>;

impl ColdroomError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::BadRequest(_)
            | Self::InvalidTagQuery(_)
            | Self::OutOfRange { .. }
            | Self::TypeMismatch { .. } => 400,

            // 404 Not Found
            Self::NotFound { .. } | Self::FieldNotFound(_) | Self::DeviceNotFound(_) => 404,

            // 502 Bad Gateway
            Self::Protocol(_)
            | Self::ModbusException { .. }
            | Self::ConnectionFailed { .. }
            | Self::NotConnected(_)
            | Self::Decode { .. } => 502,

            // 504 Gateway Timeout
            Self::Timeout(_) => 504,

            // 503 Service Unavailable
            Self::Cancelled(_) => 503,

            Self::SchemaLoad(_)
            | Self::Configuration(_)
            | Self::InvalidConfig { .. }
            | Self::Io(_)
            | Self::Database(_)
            | Self::Sqlite(_)
            | Self::Serialization(_)
            | Self::Internal(_)
            | Self::Other(_) => 500,
        }
    }

    /// Faults of the link to a device, as opposed to faults of the request.
    ///
    /// Only these put a device into its error state.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::ConnectionFailed { .. }
                | Self::NotConnected(_)
                | Self::Io(_)
                | Self::Protocol(_)
        )
    }

    /// Check if this error is retryable on the next cycle
    pub fn is_retryable(&self) -> bool {
        self.is_connection_fault() || matches!(self, Self::Decode { .. } | Self::Cancelled(_))
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "DECODE_ERROR",
            Self::FieldNotFound(_) => "FIELD_NOT_FOUND",
            Self::InvalidTagQuery(_) => "INVALID_TAG_QUERY",
            Self::SchemaLoad(_) => "SCHEMA_LOAD_ERROR",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::OutOfRange { .. } => "OUT_OF_RANGE",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::Timeout(_) => "TIMEOUT",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::NotConnected(_) => "NOT_CONNECTED",
            Self::Io(_) => "IO_ERROR",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::ModbusException { .. } => "MODBUS_EXCEPTION",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Sqlite(_) => "SQLITE_ERROR",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Cancelled(_) => "CANCELLED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    /// Log level to report this error at
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.status_code() {
            500 => Level::ERROR,
            400 | 404 => Level::INFO,
            _ => Level::WARN,
        }
    }

    /// Convert to API ErrorInfo for HTTP responses
    pub fn to_error_info(&self) -> ErrorInfo {
        let mut error_info = ErrorInfo::new(self.to_string())
            .with_code(self.status_code())
            .with_kind(self.error_code());

        match self {
            Self::InvalidConfig { field, reason } => {
                error_info = error_info.add_field_error(field, reason);
            },
            Self::TypeMismatch { expected, actual } => {
                error_info =
                    error_info.with_details(format!("expected {}, got {}", expected, actual));
            },
            _ => {},
        }

        error_info
    }

    /// HTTP status as an axum type
    #[cfg(feature = "axum-support")]
    pub fn http_status(&self) -> axum::http::StatusCode {
        axum::http::StatusCode::from_u16(self.status_code())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<serde_json::Error> for ColdroomError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ColdroomError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::SchemaLoad(err.to_string())
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::ColdroomError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::ColdroomError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! protocol_error {
    ($msg:expr) => {
        $crate::ColdroomError::Protocol($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::ColdroomError::Protocol(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ColdroomError::BadRequest("test".into()).status_code(), 400);
        assert_eq!(
            ColdroomError::FieldNotFound("nope".into()).status_code(),
            404
        );
        assert_eq!(ColdroomError::DeviceNotFound(3).status_code(), 404);
        assert_eq!(ColdroomError::Timeout("dev".into()).status_code(), 504);
        assert_eq!(
            ColdroomError::Decode {
                expected: 381,
                actual: 380
            }
            .status_code(),
            502
        );
        assert_eq!(ColdroomError::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn test_connection_faults() {
        assert!(ColdroomError::Timeout("a".into()).is_connection_fault());
        assert!(ColdroomError::NotConnected("a".into()).is_connection_fault());
        assert!(ColdroomError::Io(std::io::Error::other("reset")).is_connection_fault());
        assert!(!ColdroomError::ModbusException {
            function: 0x10,
            code: 0x02
        }
        .is_connection_fault());
        assert!(!ColdroomError::FieldNotFound("x".into()).is_connection_fault());
        assert!(!ColdroomError::FieldNotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_error_info() {
        let error = ColdroomError::InvalidConfig {
            field: "polling.period_ms".into(),
            reason: "must be positive".into(),
        };
        let info = error.to_error_info();
        assert_eq!(info.code, 500);
        assert_eq!(info.kind.as_deref(), Some("INVALID_CONFIG"));
        assert!(info.field_errors.contains_key("polling.period_ms"));
    }

    #[test]
    fn test_macros() {
        let err = config_error!("bad {}", 7);
        assert_eq!(err.to_string(), "Configuration error: bad 7");
        let err = protocol_error!("short frame");
        assert_eq!(err.error_code(), "PROTOCOL_ERROR");
    }
}

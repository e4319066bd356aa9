//! Shared building blocks for the cold-room gateway services
//!
//! - logging bootstrap (console + daily rolling file)
//! - shutdown signal handling
//! - common command-line arguments
//! - API envelope types
//! - SQLite connection helper

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub mod api_types;
pub mod bootstrap_args;
pub mod logging;
pub mod shutdown;

pub use api_types::{ErrorResponse, HealthStatus, ServiceStatus, SuccessResponse};
pub use errors::ErrorInfo;

#[cfg(feature = "axum")]
pub use api_types::AppError;

// Re-export common dependencies
pub use serde;
pub use serde_json;
pub use tokio;

#[cfg(feature = "cli")]
pub use clap;

//! Health check

use axum::{extract::State, response::Json};
use chrono::Utc;
use common::{AppError, HealthStatus, ServiceStatus, SuccessResponse};

use crate::api::routes::AppState;

/// Service health
///
/// @route GET /health
/// @output `Json<SuccessResponse<HealthStatus>>`
/// @status 200 - Healthy, or degraded when some devices are in error
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service health", body = common::HealthStatus)
    ),
    tag = "coldsrv"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<HealthStatus>>, AppError> {
    let clients = state.engine.clients();
    let devices = clients.len();
    let devices_in_error = clients.iter().filter(|c| c.is_in_error()).count();

    let status = if devices_in_error == 0 {
        ServiceStatus::Healthy
    } else if devices_in_error < devices {
        ServiceStatus::Degraded
    } else {
        ServiceStatus::Unhealthy
    };

    let uptime = (Utc::now() - state.started).num_seconds().max(0);
    let health = HealthStatus {
        status,
        service: "coldsrv".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: u64::try_from(uptime).unwrap_or(0),
        devices,
        devices_in_error,
    };
    Ok(Json(SuccessResponse::new(health)))
}

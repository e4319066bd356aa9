//! Device list, field writes and operator messages

use axum::{
    extract::{Path, State},
    response::Json,
};
use common::{AppError, SuccessResponse};
use tracing::info;

use crate::api::dto::{AcceptResponse, AnswerRequest, WriteRequest, WriteResponse};
use crate::api::routes::AppState;
use crate::config::{validate_devices, DeviceConfig};
use crate::engine::DeviceStatus;

/// Configured devices with their connection state
///
/// @route GET /api/devices
/// @output `Json<SuccessResponse<Vec<DeviceStatus>>>`
#[utoipa::path(
    get,
    path = "/api/devices",
    responses(
        (status = 200, description = "Device list", body = Vec<crate::engine::DeviceStatus>)
    ),
    tag = "devices"
)]
pub async fn list_devices(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<Vec<DeviceStatus>>>, AppError> {
    Ok(Json(SuccessResponse::new(state.engine.devices())))
}

/// Replace the device catalogue; the engine rebuilds its clients on the
/// next tick
///
/// @route PUT /api/devices
/// @input Json(devices): `Vec<DeviceConfig>`
/// @status 200 - Stored
/// @status 400 - Duplicate id, empty host or port 0
#[utoipa::path(
    put,
    path = "/api/devices",
    request_body = Vec<crate::config::DeviceConfig>,
    responses(
        (status = 200, description = "Device catalogue replaced", body = usize),
        (status = 400, description = "Invalid device list")
    ),
    tag = "devices"
)]
pub async fn replace_devices(
    State(state): State<AppState>,
    Json(devices): Json<Vec<DeviceConfig>>,
) -> Result<Json<SuccessResponse<usize>>, AppError> {
    validate_devices(&devices).map_err(|e| AppError::bad_request(e.to_string()))?;
    let count = devices.len();
    state.stores.devices.replace_devices(devices).await?;
    info!("Device catalogue replaced: {} devices", count);
    Ok(Json(SuccessResponse::new(count)))
}

/// Write one field
///
/// @route POST /api/devices/{id}/write
/// @input Json(request): WriteRequest - path, value, optional actor
/// @output `{success}`: false when the device refused or is unreachable
/// @status 400 - Unknown path, wrong type or computed field
/// @status 404 - Unknown device
#[utoipa::path(
    post,
    path = "/api/devices/{id}/write",
    params(("id" = i64, Path, description = "Device id")),
    request_body = crate::api::dto::WriteRequest,
    responses(
        (status = 200, description = "Write attempted", body = crate::api::dto::WriteResponse),
        (status = 400, description = "Invalid value"),
        (status = 404, description = "Device or field not found")
    ),
    tag = "devices"
)]
pub async fn write_field(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<WriteRequest>,
) -> Result<Json<SuccessResponse<WriteResponse>>, AppError> {
    let success = state
        .engine
        .write(id, &request.path, &request.value, request.actor.as_deref())
        .await?;
    Ok(Json(SuccessResponse::new(WriteResponse { success })))
}

/// Dismiss a pending message
///
/// @route POST /api/devices/{id}/messages/{msg_id}/accept
#[utoipa::path(
    post,
    path = "/api/devices/{id}/messages/{msg_id}/accept",
    params(
        ("id" = i64, Path, description = "Device id"),
        ("msg_id" = String, Path, description = "Message id")
    ),
    responses(
        (status = 200, description = "False when no such message is pending", body = crate::api::dto::AcceptResponse)
    ),
    tag = "devices"
)]
pub async fn accept_message(
    State(state): State<AppState>,
    Path((id, msg_id)): Path<(i64, String)>,
) -> Result<Json<SuccessResponse<AcceptResponse>>, AppError> {
    let accepted = state.engine.accept_message(id, &msg_id);
    Ok(Json(SuccessResponse::new(AcceptResponse { accepted })))
}

/// Answer a confirmation message; its yes/no writes go to the device
///
/// @route POST /api/devices/{id}/messages/{msg_id}/answer
#[utoipa::path(
    post,
    path = "/api/devices/{id}/messages/{msg_id}/answer",
    params(
        ("id" = i64, Path, description = "Device id"),
        ("msg_id" = String, Path, description = "Message id")
    ),
    request_body = crate::api::dto::AnswerRequest,
    responses(
        (status = 200, description = "Answer writes attempted", body = crate::api::dto::WriteResponse),
        (status = 404, description = "Device or message not found")
    ),
    tag = "devices"
)]
pub async fn answer_message(
    State(state): State<AppState>,
    Path((id, msg_id)): Path<(i64, String)>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<SuccessResponse<WriteResponse>>, AppError> {
    let success = state
        .engine
        .answer_message(id, &msg_id, request.yes, request.actor.as_deref())
        .await?;
    Ok(Json(SuccessResponse::new(WriteResponse { success })))
}

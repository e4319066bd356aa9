use axum::{extract::State, response::Json};
use common::{AppError, SuccessResponse};

use crate::api::dto::AcknowledgeRequest;
use crate::api::routes::AppState;

/// Acknowledge every alarm so far, of one device or of all
///
/// @route POST /api/alarms/acknowledge
/// @input Json(request): AcknowledgeRequest - optional device_id and actor
/// @status 404 - Unknown device
#[utoipa::path(
    post,
    path = "/api/alarms/acknowledge",
    request_body = crate::api::dto::AcknowledgeRequest,
    responses(
        (status = 200, description = "Alarms acknowledged", body = bool),
        (status = 404, description = "Device not found")
    ),
    tag = "alarms"
)]
pub async fn acknowledge_alarms(
    State(state): State<AppState>,
    Json(request): Json<AcknowledgeRequest>,
) -> Result<Json<SuccessResponse<bool>>, AppError> {
    state
        .engine
        .acknowledge_alarms(request.device_id, request.actor)
        .await?;
    Ok(Json(SuccessResponse::new(true)))
}

//! Runtime administration

use axum::response::Json;
use common::{logging, AppError, SuccessResponse};

use crate::api::dto::{LogLevelResponse, SetLogLevelRequest};

/// Current log filter
///
/// @route GET /api/admin/log-level
#[utoipa::path(
    get,
    path = "/api/admin/log-level",
    responses(
        (status = 200, description = "Active filter", body = LogLevelResponse)
    ),
    tag = "admin"
)]
pub async fn get_log_level() -> Json<SuccessResponse<LogLevelResponse>> {
    Json(SuccessResponse::new(LogLevelResponse {
        level: logging::get_log_level(),
    }))
}

/// Replace the log filter without a restart
///
/// @route POST /api/admin/log-level
/// @input Json(request): `{level}`
/// @status 400 - Invalid filter directives
#[utoipa::path(
    post,
    path = "/api/admin/log-level",
    request_body = SetLogLevelRequest,
    responses(
        (status = 200, description = "Filter applied", body = LogLevelResponse),
        (status = 400, description = "Invalid filter")
    ),
    tag = "admin"
)]
pub async fn set_log_level(
    Json(request): Json<SetLogLevelRequest>,
) -> Result<Json<SuccessResponse<LogLevelResponse>>, AppError> {
    logging::set_log_level(&request.level)?;
    Ok(Json(SuccessResponse::new(LogLevelResponse {
        level: logging::get_log_level(),
    })))
}

//! Which measurements, alarms and parameters get recorded

use axum::{
    extract::{Path, State},
    response::Json,
};
use common::{AppError, SuccessResponse};
use tracing::info;

use crate::api::dto::CatalogueUpdate;
use crate::api::routes::AppState;
use crate::storage::{CatalogueEntry, CatalogueKind};

fn parse_kind(kind: &str) -> Result<CatalogueKind, AppError> {
    kind.parse::<CatalogueKind>()
        .map_err(|e| AppError::bad_request(e.to_string()))
}

/// List catalogue entries of one kind
///
/// @route GET /api/catalogue/{kind}
/// @input Path(kind): measurement | alarm | parameter (plural accepted)
#[utoipa::path(
    get,
    path = "/api/catalogue/{kind}",
    params(("kind" = String, Path, description = "measurement, alarm or parameter")),
    responses(
        (status = 200, description = "Catalogue entries", body = Vec<crate::storage::CatalogueEntry>),
        (status = 400, description = "Unknown kind")
    ),
    tag = "catalogue"
)]
pub async fn list_catalogue(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<SuccessResponse<Vec<CatalogueEntry>>>, AppError> {
    let kind = parse_kind(&kind)?;
    let entries = state.stores.catalogue.list(kind).await?;
    Ok(Json(SuccessResponse::new(entries)))
}

/// Enable or disable recording of one path
///
/// @route PATCH /api/catalogue/{kind}/{path}
/// @input Json(update): `{enabled}`
/// @status 404 - Path not in the catalogue
#[utoipa::path(
    patch,
    path = "/api/catalogue/{kind}/{path}",
    params(
        ("kind" = String, Path, description = "measurement, alarm or parameter"),
        ("path" = String, Path, description = "Field path")
    ),
    request_body = crate::api::dto::CatalogueUpdate,
    responses(
        (status = 200, description = "Entry updated", body = bool),
        (status = 404, description = "Entry not found")
    ),
    tag = "catalogue"
)]
pub async fn update_catalogue_entry(
    State(state): State<AppState>,
    Path((kind, path)): Path<(String, String)>,
    Json(update): Json<CatalogueUpdate>,
) -> Result<Json<SuccessResponse<bool>>, AppError> {
    let kind = parse_kind(&kind)?;
    state
        .stores
        .catalogue
        .set_enabled(kind, &path, update.enabled)
        .await?;
    info!("Catalogue {} {}: enabled={}", kind, path, update.enabled);
    Ok(Json(SuccessResponse::new(update.enabled)))
}

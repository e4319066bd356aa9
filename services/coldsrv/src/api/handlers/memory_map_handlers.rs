//! Memory map listing

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Json},
};
use coldroom_memmap::{write_rows_csv, FieldDescriptor, MemoryMapRow};
use common::{AppError, SuccessResponse};

use crate::api::dto::MemoryMapQuery;
use crate::api::routes::AppState;

fn rows(state: &AppState, reserved: bool) -> Vec<MemoryMapRow> {
    let schema = state.engine.schema();
    if reserved {
        schema.export_rows_with_reserved()
    } else {
        schema.export_rows()
    }
}

/// Memory map as JSON rows
///
/// @route GET /api/memory-map
/// @input Query(reserved): include `_` reserved slots
#[utoipa::path(
    get,
    path = "/api/memory-map",
    params(MemoryMapQuery),
    responses(
        (status = 200, description = "Memory map rows", body = Vec<coldroom_memmap::MemoryMapRow>)
    ),
    tag = "memory-map"
)]
pub async fn get_memory_map(
    State(state): State<AppState>,
    Query(query): Query<MemoryMapQuery>,
) -> Result<Json<SuccessResponse<Vec<MemoryMapRow>>>, AppError> {
    let rows = rows(&state, query.reserved);
    Ok(Json(
        SuccessResponse::new(rows)
            .with_metadata("registers", state.engine.schema().total_registers().into()),
    ))
}

/// Memory map as CSV
///
/// @route GET /api/memory-map.csv
#[utoipa::path(
    get,
    path = "/api/memory-map.csv",
    params(MemoryMapQuery),
    responses(
        (status = 200, description = "Memory map CSV", content_type = "text/csv", body = String)
    ),
    tag = "memory-map"
)]
pub async fn get_memory_map_csv(
    State(state): State<AppState>,
    Query(query): Query<MemoryMapQuery>,
) -> Result<impl IntoResponse, AppError> {
    let mut buf = Vec::new();
    write_rows_csv(&rows(&state, query.reserved), &mut buf)?;
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], buf))
}

/// One register-backed field
///
/// @route GET /api/fields/{path}
/// @status 404 - Unknown or computed path
#[utoipa::path(
    get,
    path = "/api/fields/{path}",
    params(("path" = String, Path, description = "Dotted field path")),
    responses(
        (status = 200, description = "Field descriptor"),
        (status = 404, description = "Field not found")
    ),
    tag = "memory-map"
)]
pub async fn get_field(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<SuccessResponse<FieldDescriptor>>, AppError> {
    let field = state.engine.schema().get_field(&path)?.clone();
    Ok(Json(SuccessResponse::new(field)))
}

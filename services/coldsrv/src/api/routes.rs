//! API Route Configuration

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, Utc};
use tower_http::trace::TraceLayer;

#[cfg(feature = "swagger-ui")]
use utoipa::OpenApi;

use crate::api::handlers::{
    admin_handlers::{get_log_level, set_log_level},
    alarm_handlers::acknowledge_alarms,
    catalogue_handlers::{list_catalogue, update_catalogue_entry},
    device_handlers::{accept_message, answer_message, list_devices, replace_devices, write_field},
    health::health_check,
    memory_map_handlers::{get_field, get_memory_map, get_memory_map_csv},
    snapshot_handlers::{get_snapshot, stream_payloads},
};
use crate::engine::EngineHandle;
use crate::storage::Stores;

/// Shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub stores: Stores,
    pub started: DateTime<Utc>,
}

impl AppState {
    pub fn new(engine: EngineHandle, stores: Stores) -> Self {
        Self {
            engine,
            stores,
            started: Utc::now(),
        }
    }
}

// OpenAPI documentation - only compiled when swagger-ui feature is enabled
#[cfg(feature = "swagger-ui")]
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cold Room Gateway API",
        description = "Live state, control and recording settings of the cold-room controllers"
    ),
    paths(
        crate::api::handlers::health::health_check,
        crate::api::handlers::snapshot_handlers::get_snapshot,
        crate::api::handlers::snapshot_handlers::stream_payloads,
        crate::api::handlers::device_handlers::list_devices,
        crate::api::handlers::device_handlers::replace_devices,
        crate::api::handlers::device_handlers::write_field,
        crate::api::handlers::device_handlers::accept_message,
        crate::api::handlers::device_handlers::answer_message,
        crate::api::handlers::alarm_handlers::acknowledge_alarms,
        crate::api::handlers::catalogue_handlers::list_catalogue,
        crate::api::handlers::catalogue_handlers::update_catalogue_entry,
        crate::api::handlers::memory_map_handlers::get_memory_map,
        crate::api::handlers::memory_map_handlers::get_memory_map_csv,
        crate::api::handlers::memory_map_handlers::get_field,
        crate::api::handlers::admin_handlers::get_log_level,
        crate::api::handlers::admin_handlers::set_log_level
    ),
    components(
        schemas(
            crate::api::dto::WriteRequest,
            crate::api::dto::WriteResponse,
            crate::api::dto::AcceptResponse,
            crate::api::dto::AnswerRequest,
            crate::api::dto::AcknowledgeRequest,
            crate::api::dto::CatalogueUpdate,
            crate::api::dto::LogLevelResponse,
            crate::api::dto::SetLogLevelRequest,
            crate::engine::BroadcastPayload,
            crate::engine::AlarmSummary,
            crate::engine::DeviceStatus,
            crate::device::DeviceMessage,
            crate::device::DeviceState,
            crate::config::DeviceConfig,
            crate::storage::CatalogueEntry,
            crate::storage::CatalogueKind,
            coldroom_memmap::MemoryMapRow,
            common::HealthStatus,
            common::ServiceStatus
        )
    ),
    tags(
        (name = "coldsrv", description = "Cold Room Gateway API"),
        (name = "devices", description = "Devices, writes and operator messages"),
        (name = "alarms", description = "Alarm acknowledgement"),
        (name = "catalogue", description = "Recording catalogue"),
        (name = "memory-map", description = "Register map listing"),
        (name = "admin", description = "Runtime administration")
    )
)]
pub struct ColdsrvApiDoc;

/// Create all API routes
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Live state
        .route("/api/snapshot", get(get_snapshot))
        .route("/api/stream", get(stream_payloads))
        // Devices
        .route("/api/devices", get(list_devices).put(replace_devices))
        .route("/api/devices/{id}/write", post(write_field))
        .route(
            "/api/devices/{id}/messages/{msg_id}/accept",
            post(accept_message),
        )
        .route(
            "/api/devices/{id}/messages/{msg_id}/answer",
            post(answer_message),
        )
        .route("/api/alarms/acknowledge", post(acknowledge_alarms))
        // Recording catalogue
        .route("/api/catalogue/{kind}", get(list_catalogue))
        .route("/api/catalogue/{kind}/{path}", patch(update_catalogue_entry))
        // Memory map
        .route("/api/memory-map", get(get_memory_map))
        .route("/api/memory-map.csv", get(get_memory_map_csv))
        .route("/api/fields/{path}", get(get_field))
        // Admin
        .route("/api/admin/log-level", get(get_log_level).post(set_log_level))
        .layer(middleware::from_fn(common::logging::http_request_logger))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//! Request and response bodies

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::{IntoParams, ToSchema};

/// Field write request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WriteRequest {
    /// Dotted field path, e.g. `pidHumidity.pCoefficient`
    pub path: String,
    #[schema(value_type = Object)]
    pub value: JsonValue,
    /// Who asked for the write, recorded with the command
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WriteResponse {
    /// False when the device refused or could not be reached
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AcceptResponse {
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnswerRequest {
    pub yes: bool,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AcknowledgeRequest {
    /// All devices when absent
    #[serde(default)]
    pub device_id: Option<i64>,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CatalogueUpdate {
    pub enabled: bool,
}

/// Active tracing filter
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogLevelResponse {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SetLogLevelRequest {
    /// `EnvFilter` directives, e.g. `info,coldsrv=trace`
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct MemoryMapQuery {
    /// Include `_`-prefixed reserved slots
    #[serde(default)]
    pub reserved: bool,
}

//! What every tick publishes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use utoipa::ToSchema;

use crate::device::{DeviceClient, DeviceMessage};
use crate::storage::AlarmEvent;

/// Live view of all devices.
///
/// `structs` holds one object per device: `device` (id), `error` when the
/// device is failing, and every visible field of its last snapshot with
/// non-finite floats as `null`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BroadcastPayload {
    pub ts: DateTime<Utc>,
    #[schema(value_type = Vec<Object>)]
    pub structs: Vec<JsonValue>,
    /// Alarms nobody acknowledged yet
    pub alarms: Vec<AlarmSummary>,
    /// Pending operator messages of every device
    pub messages: Vec<DeviceMessage>,
}

/// An unacknowledged alarm event with its live state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AlarmSummary {
    pub ts: DateTime<Utc>,
    pub device_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    pub path: String,
    pub name: String,
    pub description: String,
    /// Still raised on the device
    pub active: bool,
}

impl AlarmSummary {
    pub fn new(event: AlarmEvent, client: Option<&DeviceClient>, description: String) -> Self {
        let active = client
            .and_then(DeviceClient::current)
            .and_then(|snapshot| snapshot.get_bool(&event.path).ok())
            .unwrap_or(false);
        Self {
            ts: event.ts,
            device_id: event.device_id,
            device_name: client.map(|c| c.name().to_string()),
            name: event.path.clone(),
            path: event.path,
            description,
            active,
        }
    }
}

/// `{device, error?, ...fields}` for one client
pub fn device_struct(client: &DeviceClient) -> JsonValue {
    let mut map = Map::new();
    map.insert("device".to_string(), JsonValue::from(client.id()));
    if let Some(error) = client.error() {
        map.insert("error".to_string(), JsonValue::String(error));
    }
    if let Some(snapshot) = client.current() {
        map.extend(snapshot.to_json_map(true));
    }
    JsonValue::Object(map)
}

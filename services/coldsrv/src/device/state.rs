//! Per-device connection state and error tracking

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Device lifecycle: `Disconnected → Connecting → Ready ⇄ Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    #[default]
    Disconnected,
    Connecting,
    Ready,
    Error,
}

impl DeviceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last error of a device.
///
/// `set` and `clear` report whether the flag's presence changed, so callers
/// notify on transitions only. A new message over an existing error just
/// replaces the text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFlag(Option<String>);

impl ErrorFlag {
    pub fn set(&mut self, message: impl Into<String>) -> bool {
        let raised = self.0.is_none();
        self.0 = Some(message.into());
        raised
    }

    pub fn clear(&mut self) -> bool {
        self.0.take().is_some()
    }

    pub fn get(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }
}

/// Published when a device enters or leaves its error state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceNotification {
    ErrorRaised {
        device_id: i64,
        name: String,
        error: String,
    },
    ErrorCleared {
        device_id: i64,
        name: String,
    },
}

impl DeviceNotification {
    pub fn device_id(&self) -> i64 {
        match self {
            Self::ErrorRaised { device_id, .. } | Self::ErrorCleared { device_id, .. } => {
                *device_id
            },
        }
    }
}

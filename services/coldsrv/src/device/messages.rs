//! Operator messages raised by controller flags
//!
//! Each rule watches one flag for a rising edge between two consecutive
//! snapshots. A raised message stays pending, keyed by the flag name, until
//! an operator accepts or answers it.

use coldroom_memmap::DeviceSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use utoipa::ToSchema;

use crate::config::DeviceConfig;

pub const FINAL_INJECTION: &str = "finalInjectionMessageActivated";
pub const C2H4_LOW_PRESSURE: &str = "C2H4LowPressureAlarm";
pub const EMERGENCY_STOP: &str = "emergencyStopState";
pub const MANUAL_POWER_CUT: &str = "manualPowerCutMessage";
pub const POWER_OUTAGE: &str = "powerOutage";

const START1: &str = "start1";
const START2: &str = "start2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Needs a yes/no answer
    Confirm,
    /// Needs an acknowledgement only
    Notify,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MessageSource {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeviceMessage {
    /// Name of the flag that raised it
    pub id: String,
    pub kind: MessageKind,
    pub text: String,
    /// Writes applied when a confirm message is answered yes
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    #[schema(value_type = Object)]
    pub yes: Map<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    #[schema(value_type = Object)]
    pub no: Map<String, JsonValue>,
    /// Also goes to the service log
    pub log: bool,
    pub src: MessageSource,
}

impl DeviceMessage {
    fn notify(id: &str, text: &str, log: bool, src: &MessageSource) -> Self {
        Self {
            id: id.to_string(),
            kind: MessageKind::Notify,
            text: text.to_string(),
            yes: Map::new(),
            no: Map::new(),
            log,
            src: src.clone(),
        }
    }

    /// Writes for the chosen answer
    pub fn answer(&self, yes: bool) -> &Map<String, JsonValue> {
        if yes {
            &self.yes
        } else {
            &self.no
        }
    }
}

fn flag(snapshot: &DeviceSnapshot, path: &str) -> bool {
    snapshot.get_bool(path).unwrap_or(false)
}

fn rising(previous: &DeviceSnapshot, current: &DeviceSnapshot, path: &str) -> bool {
    !flag(previous, path) && flag(current, path)
}

fn writes(entries: [(&str, bool); 3]) -> Map<String, JsonValue> {
    entries
        .into_iter()
        .map(|(path, value)| (path.to_string(), JsonValue::Bool(value)))
        .collect()
}

/// Messages raised by the transition `previous → current`
pub fn evaluate(
    device: &DeviceConfig,
    previous: &DeviceSnapshot,
    current: &DeviceSnapshot,
) -> Vec<DeviceMessage> {
    let src = MessageSource {
        id: device.id,
        name: device.name.clone(),
    };
    let mut raised = Vec::new();

    if rising(previous, current, FINAL_INJECTION) {
        let start1 = flag(current, START1);
        let start2 = flag(current, START2);
        if start1 && !start2 {
            raised.push(DeviceMessage {
                id: FINAL_INJECTION.to_string(),
                kind: MessageKind::Confirm,
                text: "Fin de inyección inicial de etileno.\n\
                       ¿Iniciar el control por balance de gases?"
                    .to_string(),
                yes: writes([(FINAL_INJECTION, false), (START1, false), (START2, true)]),
                no: writes([(FINAL_INJECTION, false), (START1, false), (START2, false)]),
                log: false,
                src: src.clone(),
            });
        } else if start1 && start2 {
            raised.push(DeviceMessage::notify(
                FINAL_INJECTION,
                "Fin de inyección inicial de etileno",
                false,
                &src,
            ));
        }
    }

    let notifications = [
        (
            C2H4_LOW_PRESSURE,
            "Nivel bajo de Etileno, es necesario cambiar las botellas de etileno",
            true,
        ),
        (EMERGENCY_STOP, "Seta de emergencia pulsada", true),
        (
            MANUAL_POWER_CUT,
            "Interruptor manual de corte de corriente activado",
            true,
        ),
        (POWER_OUTAGE, "Corte de corriente", false),
    ];
    for (path, text, log) in notifications {
        if rising(previous, current, path) {
            raised.push(DeviceMessage::notify(path, text, log, &src));
        }
    }

    raised
}

//! Stored records

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use coldroom_memmap::FieldType;
use errors::ColdroomError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CatalogueKind {
    Measurement,
    Alarm,
    Parameter,
}

impl CatalogueKind {
    pub const ALL: [CatalogueKind; 3] = [Self::Measurement, Self::Alarm, Self::Parameter];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Measurement => "measurement",
            Self::Alarm => "alarm",
            Self::Parameter => "parameter",
        }
    }
}

impl fmt::Display for CatalogueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CatalogueKind {
    type Err = ColdroomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "measurement" | "measurements" => Ok(Self::Measurement),
            "alarm" | "alarms" => Ok(Self::Alarm),
            "parameter" | "parameters" => Ok(Self::Parameter),
            other => Err(ColdroomError::BadRequest(format!(
                "Unknown catalogue kind: {other}"
            ))),
        }
    }
}

/// Storage class of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Int,
    Float,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
        }
    }
}

impl From<FieldType> for ValueType {
    fn from(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Bool => Self::Bool,
            FieldType::F32 => Self::Float,
            FieldType::U16 | FieldType::I16 | FieldType::U32 | FieldType::I32 => Self::Int,
        }
    }
}

impl FromStr for ValueType {
    type Err = ColdroomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(Self::Bool),
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            other => Err(ColdroomError::Database(format!("Unknown value type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CatalogueEntry {
    pub kind: CatalogueKind,
    pub path: String,
    pub value_type: ValueType,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AlarmEvent {
    pub ts: DateTime<Utc>,
    pub device_id: i64,
    pub path: String,
    pub value: bool,
    /// When the alarm fell; `None` while it is still raised
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ParameterChangeEvent {
    pub ts: DateTime<Utc>,
    pub device_id: i64,
    pub path: String,
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
}

/// A write requested by an operator or by the engine itself (`actor: None`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ParameterChangeCommand {
    pub ts: DateTime<Utc>,
    pub device_id: i64,
    pub path: String,
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
    pub actor: Option<String>,
}

/// Acknowledges the ended alarms of one device, or of all devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AcknowledgeAlarmsEvent {
    pub ts: DateTime<Utc>,
    pub device_id: Option<i64>,
    pub actor: Option<String>,
}

impl AcknowledgeAlarmsEvent {
    /// An alarm is cleared only by an acknowledgement made after it ended
    pub fn covers(&self, alarm: &AlarmEvent) -> bool {
        alarm.ts_end.is_some_and(|end| self.ts > end)
            && self.device_id.map_or(true, |id| id == alarm.device_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSample {
    pub ts: DateTime<Utc>,
    pub device_id: i64,
    pub path: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoolSample {
    pub ts: DateTime<Utc>,
    pub device_id: i64,
    pub path: String,
    pub value: bool,
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("alarms".parse::<CatalogueKind>().unwrap(), CatalogueKind::Alarm);
        assert_eq!(
            "Measurement".parse::<CatalogueKind>().unwrap(),
            CatalogueKind::Measurement
        );
        assert!("widgets".parse::<CatalogueKind>().is_err());
    }

    #[test]
    fn test_value_type_from_field_type() {
        assert_eq!(ValueType::from(FieldType::Bool), ValueType::Bool);
        assert_eq!(ValueType::from(FieldType::I32), ValueType::Int);
        assert_eq!(ValueType::from(FieldType::F32), ValueType::Float);
    }

    #[test]
    fn test_acknowledgement_coverage() {
        let now = Utc::now();
        let mut alarm = AlarmEvent {
            ts: now,
            device_id: 3,
            path: "door1Blocked".into(),
            value: true,
            ts_end: None,
        };
        let all = AcknowledgeAlarmsEvent {
            ts: now + Duration::seconds(2),
            device_id: None,
            actor: None,
        };
        // Still raised
        assert!(!all.covers(&alarm));

        alarm.ts_end = Some(now + Duration::seconds(1));
        let other_device = AcknowledgeAlarmsEvent {
            device_id: Some(4),
            ..all.clone()
        };
        let before_end = AcknowledgeAlarmsEvent {
            ts: now + Duration::seconds(1),
            device_id: Some(3),
            actor: None,
        };
        assert!(all.covers(&alarm));
        assert!(!other_device.covers(&alarm));
        assert!(!before_end.covers(&alarm));
    }
}

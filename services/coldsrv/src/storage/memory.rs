//! In-memory stores

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use errors::{ColdroomError, Result};
use parking_lot::RwLock;
use tokio::sync::watch;

use super::types::{
    AcknowledgeAlarmsEvent, AlarmEvent, BoolSample, CatalogueEntry, CatalogueKind,
    NumericSample, ParameterChangeCommand, ParameterChangeEvent,
};
use super::{Catalogue, DeviceCatalogue, EventStore, HistoricalSink};
use crate::config::DeviceConfig;

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    alarms: RwLock<Vec<AlarmEvent>>,
    parameters: RwLock<Vec<ParameterChangeEvent>>,
    last_parameter: DashMap<(i64, String), serde_json::Value>,
    commands: RwLock<Vec<ParameterChangeCommand>>,
    acknowledgements: RwLock<Vec<AcknowledgeAlarmsEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append_alarm(&self, event: AlarmEvent) -> Result<()> {
        self.alarms.write().push(event);
        Ok(())
    }

    async fn close_alarm(&self, device_id: i64, path: &str, ts: DateTime<Utc>) -> Result<bool> {
        let mut alarms = self.alarms.write();
        let open = alarms
            .iter_mut()
            .rev()
            .find(|a| a.device_id == device_id && a.path == path && a.ts_end.is_none());
        Ok(match open {
            Some(alarm) => {
                alarm.ts_end = Some(ts);
                true
            },
            None => false,
        })
    }

    async fn save_parameter_on_change(&self, event: ParameterChangeEvent) -> Result<bool> {
        let key = (event.device_id, event.path.clone());
        if self.last_parameter.get(&key).is_some_and(|last| *last == event.value) {
            return Ok(false);
        }
        self.last_parameter.insert(key, event.value.clone());
        self.parameters.write().push(event);
        Ok(true)
    }

    async fn append_command(&self, command: ParameterChangeCommand) -> Result<()> {
        self.commands.write().push(command);
        Ok(())
    }

    async fn append_acknowledgement(&self, ack: AcknowledgeAlarmsEvent) -> Result<()> {
        self.acknowledgements.write().push(ack);
        Ok(())
    }

    async fn unacknowledged_alarms(&self) -> Result<Vec<AlarmEvent>> {
        let acks = self.acknowledgements.read();
        Ok(self
            .alarms
            .read()
            .iter()
            .filter(|alarm| !acks.iter().any(|ack| ack.covers(alarm)))
            .cloned()
            .collect())
    }

    async fn alarm_events(&self, device_id: Option<i64>) -> Result<Vec<AlarmEvent>> {
        Ok(self
            .alarms
            .read()
            .iter()
            .filter(|a| device_id.map_or(true, |id| a.device_id == id))
            .cloned()
            .collect())
    }

    async fn parameter_events(&self, device_id: i64) -> Result<Vec<ParameterChangeEvent>> {
        Ok(self
            .parameters
            .read()
            .iter()
            .filter(|p| p.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn commands(&self, device_id: i64) -> Result<Vec<ParameterChangeCommand>> {
        Ok(self
            .commands
            .read()
            .iter()
            .filter(|c| c.device_id == device_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryHistoricalSink {
    numeric: RwLock<Vec<NumericSample>>,
    bools: RwLock<Vec<BoolSample>>,
    last_bool: DashMap<(i64, String), bool>,
}

impl MemoryHistoricalSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoricalSink for MemoryHistoricalSink {
    async fn insert_numeric(&self, rows: Vec<NumericSample>) -> Result<usize> {
        let count = rows.len();
        self.numeric.write().extend(rows);
        Ok(count)
    }

    async fn insert_bool_on_change(&self, sample: BoolSample) -> Result<bool> {
        let key = (sample.device_id, sample.path.clone());
        if self.last_bool.get(&key).is_some_and(|last| *last == sample.value) {
            return Ok(false);
        }
        self.last_bool.insert(key, sample.value);
        self.bools.write().push(sample);
        Ok(true)
    }

    async fn numeric_samples(&self, device_id: i64, path: &str) -> Result<Vec<NumericSample>> {
        Ok(self
            .numeric
            .read()
            .iter()
            .filter(|s| s.device_id == device_id && s.path == path)
            .cloned()
            .collect())
    }

    async fn bool_samples(&self, device_id: i64, path: &str) -> Result<Vec<BoolSample>> {
        Ok(self
            .bools
            .read()
            .iter()
            .filter(|s| s.device_id == device_id && s.path == path)
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
pub struct MemoryCatalogue {
    entries: DashMap<(CatalogueKind, String), CatalogueEntry>,
    version: watch::Sender<u64>,
}

impl Default for MemoryCatalogue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalogue {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            entries: DashMap::new(),
            version,
        }
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

#[async_trait]
impl Catalogue for MemoryCatalogue {
    async fn list(&self, kind: CatalogueKind) -> Result<Vec<CatalogueEntry>> {
        let mut entries: Vec<CatalogueEntry> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == kind)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn insert_missing(&self, entries: Vec<CatalogueEntry>) -> Result<usize> {
        let mut inserted = 0;
        for entry in entries {
            let key = (entry.kind, entry.path.clone());
            if !self.entries.contains_key(&key) {
                self.entries.insert(key, entry);
                inserted += 1;
            }
        }
        if inserted > 0 {
            self.bump();
        }
        Ok(inserted)
    }

    async fn set_enabled(&self, kind: CatalogueKind, path: &str, enabled: bool) -> Result<()> {
        match self.entries.get_mut(&(kind, path.to_string())) {
            Some(mut entry) => entry.enabled = enabled,
            None => {
                return Err(ColdroomError::NotFound {
                    resource: format!("{kind} {path}"),
                })
            },
        }
        self.bump();
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

#[derive(Debug)]
pub struct MemoryDeviceCatalogue {
    devices: RwLock<Vec<DeviceConfig>>,
    version: watch::Sender<u64>,
}

impl MemoryDeviceCatalogue {
    pub fn new(devices: Vec<DeviceConfig>) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            devices: RwLock::new(devices),
            version,
        }
    }
}

#[async_trait]
impl DeviceCatalogue for MemoryDeviceCatalogue {
    async fn list_devices(&self) -> Result<Vec<DeviceConfig>> {
        Ok(self.devices.read().clone())
    }

    async fn replace_devices(&self, devices: Vec<DeviceConfig>) -> Result<()> {
        *self.devices.write() = devices;
        self.version.send_modify(|v| *v += 1);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::storage::ValueType;
    use chrono::Duration;
    use serde_json::json;

    fn param(value: serde_json::Value) -> ParameterChangeEvent {
        ParameterChangeEvent {
            ts: Utc::now(),
            device_id: 1,
            path: "temperatureSetPoint".into(),
            value,
        }
    }

    #[tokio::test]
    async fn test_parameter_save_on_change() {
        let store = MemoryEventStore::new();
        assert!(store.save_parameter_on_change(param(json!(40))).await.unwrap());
        assert!(!store.save_parameter_on_change(param(json!(40))).await.unwrap());
        assert!(store.save_parameter_on_change(param(json!(45))).await.unwrap());
        assert_eq!(store.parameter_events(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_alarm_stays_listed_until_ended_and_acknowledged() {
        let store = MemoryEventStore::new();
        let t0 = Utc::now();
        store
            .append_alarm(AlarmEvent {
                ts: t0,
                device_id: 1,
                path: "door1Blocked".into(),
                value: true,
                ts_end: None,
            })
            .await
            .unwrap();
        let ack = |secs| AcknowledgeAlarmsEvent {
            ts: t0 + Duration::seconds(secs),
            device_id: None,
            actor: Some("operator".into()),
        };

        store.append_acknowledgement(ack(1)).await.unwrap();
        assert_eq!(store.unacknowledged_alarms().await.unwrap().len(), 1);

        assert!(store
            .close_alarm(1, "door1Blocked", t0 + Duration::seconds(2))
            .await
            .unwrap());
        assert!(!store
            .close_alarm(1, "door1Blocked", t0 + Duration::seconds(3))
            .await
            .unwrap());
        assert_eq!(store.unacknowledged_alarms().await.unwrap().len(), 1);

        store.append_acknowledgement(ack(4)).await.unwrap();
        assert!(store.unacknowledged_alarms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bool_on_change() {
        let sink = MemoryHistoricalSink::new();
        let sample = |value| BoolSample {
            ts: Utc::now(),
            device_id: 1,
            path: "onOffSystem".into(),
            value,
        };
        assert!(sink.insert_bool_on_change(sample(true)).await.unwrap());
        assert!(!sink.insert_bool_on_change(sample(true)).await.unwrap());
        assert!(sink.insert_bool_on_change(sample(false)).await.unwrap());
        assert_eq!(sink.bool_samples(1, "onOffSystem").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_catalogue_insert_missing_keeps_existing() {
        let catalogue = MemoryCatalogue::new();
        let mut rx = catalogue.subscribe();
        let entry = CatalogueEntry {
            kind: CatalogueKind::Alarm,
            path: "door1Blocked".into(),
            value_type: ValueType::Bool,
            enabled: false,
        };
        assert_eq!(catalogue.insert_missing(vec![entry.clone()]).await.unwrap(), 1);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        catalogue
            .set_enabled(CatalogueKind::Alarm, "door1Blocked", true)
            .await
            .unwrap();
        assert_eq!(catalogue.insert_missing(vec![entry]).await.unwrap(), 0);
        let listed = catalogue.list(CatalogueKind::Alarm).await.unwrap();
        assert!(listed[0].enabled);
        assert!(catalogue
            .set_enabled(CatalogueKind::Parameter, "door1Blocked", true)
            .await
            .is_err());
    }
}

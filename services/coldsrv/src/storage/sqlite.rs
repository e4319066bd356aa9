//! SQLite-backed stores

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::sqlite::{SqliteClient, SqlitePool};
use errors::{ColdroomError, Result};
use sqlx::{QueryBuilder, Sqlite};
use tokio::sync::watch;
use tracing::{debug, info};

use super::types::{
    AcknowledgeAlarmsEvent, AlarmEvent, BoolSample, CatalogueEntry, CatalogueKind,
    NumericSample, ParameterChangeCommand, ParameterChangeEvent, ValueType,
};
use super::{Catalogue, DeviceCatalogue, EventStore, HistoricalSink};
use crate::config::DeviceConfig;

/// Rows per multi-row INSERT (4 binds each, well under SQLite's limit)
const INSERT_BATCH: usize = 200;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS alarm_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts TEXT NOT NULL,
        device_id INTEGER NOT NULL,
        path TEXT NOT NULL,
        value INTEGER NOT NULL,
        ts_end TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_alarm_events_key
        ON alarm_events (device_id, path, id)",
    "CREATE TABLE IF NOT EXISTS parameter_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts TEXT NOT NULL,
        device_id INTEGER NOT NULL,
        path TEXT NOT NULL,
        value TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_parameter_events_key
        ON parameter_events (device_id, path, id)",
    "CREATE TABLE IF NOT EXISTS parameter_commands (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts TEXT NOT NULL,
        device_id INTEGER NOT NULL,
        path TEXT NOT NULL,
        value TEXT NOT NULL,
        actor TEXT
    )",
    "CREATE TABLE IF NOT EXISTS alarm_acknowledgements (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts TEXT NOT NULL,
        device_id INTEGER,
        actor TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_alarm_acknowledgements_ts
        ON alarm_acknowledgements (ts)",
    "CREATE TABLE IF NOT EXISTS numeric_samples (
        ts TEXT NOT NULL,
        device_id INTEGER NOT NULL,
        path TEXT NOT NULL,
        value REAL NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_numeric_samples_key
        ON numeric_samples (device_id, path, ts)",
    "CREATE TABLE IF NOT EXISTS bool_samples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts TEXT NOT NULL,
        device_id INTEGER NOT NULL,
        path TEXT NOT NULL,
        value INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_bool_samples_key
        ON bool_samples (device_id, path, id)",
    "CREATE TABLE IF NOT EXISTS catalogue (
        kind TEXT NOT NULL,
        path TEXT NOT NULL,
        value_type TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (kind, path)
    )",
    "CREATE TABLE IF NOT EXISTS devices (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        host TEXT NOT NULL,
        port INTEGER NOT NULL,
        unit INTEGER NOT NULL,
        address INTEGER NOT NULL,
        enable_co2_proportional_ctrl INTEGER NOT NULL DEFAULT 0,
        enable_c2h4_proportional_ctrl INTEGER NOT NULL DEFAULT 0
    )",
];

type DeviceRow = (i64, String, String, i64, i64, i64, bool, bool);
type AlarmRow = (DateTime<Utc>, i64, String, bool, Option<DateTime<Utc>>);

fn alarm_from_row((ts, device_id, path, value, ts_end): AlarmRow) -> AlarmEvent {
    AlarmEvent {
        ts,
        device_id,
        path,
        value,
        ts_end,
    }
}

/// All four stores over one SQLite database
pub struct SqliteStore {
    client: SqliteClient,
    catalogue_version: watch::Sender<u64>,
    device_version: watch::Sender<u64>,
}

impl SqliteStore {
    /// Wrap a client and create missing tables
    pub async fn open(client: SqliteClient) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(client.pool()).await?;
        }
        Self::add_alarm_end_column(&client).await?;
        info!("SQLite schema ready: {}", client.path());
        let (catalogue_version, _) = watch::channel(0);
        let (device_version, _) = watch::channel(0);
        Ok(Self {
            client,
            catalogue_version,
            device_version,
        })
    }

    /// Databases created before alarms carried an end time
    async fn add_alarm_end_column(client: &SqliteClient) -> Result<()> {
        let present: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('alarm_events') WHERE name = 'ts_end'",
        )
        .fetch_one(client.pool())
        .await?;
        if present == 0 {
            sqlx::query("ALTER TABLE alarm_events ADD COLUMN ts_end TEXT")
                .execute(client.pool())
                .await?;
            info!("alarm_events: added ts_end column");
        }
        Ok(())
    }

    pub async fn in_memory() -> Result<Self> {
        Self::open(SqliteClient::in_memory().await?).await
    }

    fn pool(&self) -> &SqlitePool {
        self.client.pool()
    }
}

fn to_json_text(value: &serde_json::Value) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json_text(text: &str) -> Result<serde_json::Value> {
    Ok(serde_json::from_str(text)?)
}

fn column_u16(value: i64, column: &str) -> Result<u16> {
    u16::try_from(value)
        .map_err(|_| ColdroomError::Database(format!("{column} out of range: {value}")))
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn append_alarm(&self, event: AlarmEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO alarm_events (ts, device_id, path, value, ts_end) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(event.ts)
        .bind(event.device_id)
        .bind(&event.path)
        .bind(event.value)
        .bind(event.ts_end)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn close_alarm(&self, device_id: i64, path: &str, ts: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE alarm_events SET ts_end = ?1
             WHERE id = (
                SELECT MAX(id) FROM alarm_events
                WHERE device_id = ?2 AND path = ?3 AND ts_end IS NULL
             )",
        )
        .bind(ts)
        .bind(device_id)
        .bind(path)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_parameter_on_change(&self, event: ParameterChangeEvent) -> Result<bool> {
        let last: Option<String> = sqlx::query_scalar(
            "SELECT value FROM parameter_events WHERE device_id = ? AND path = ?
             ORDER BY id DESC LIMIT 1",
        )
        .bind(event.device_id)
        .bind(&event.path)
        .fetch_optional(self.pool())
        .await?;

        if let Some(last) = last {
            if from_json_text(&last)? == event.value {
                return Ok(false);
            }
        }

        sqlx::query(
            "INSERT INTO parameter_events (ts, device_id, path, value) VALUES (?, ?, ?, ?)",
        )
        .bind(event.ts)
        .bind(event.device_id)
        .bind(&event.path)
        .bind(to_json_text(&event.value)?)
        .execute(self.pool())
        .await?;
        Ok(true)
    }

    async fn append_command(&self, command: ParameterChangeCommand) -> Result<()> {
        sqlx::query(
            "INSERT INTO parameter_commands (ts, device_id, path, value, actor)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(command.ts)
        .bind(command.device_id)
        .bind(&command.path)
        .bind(to_json_text(&command.value)?)
        .bind(&command.actor)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn append_acknowledgement(&self, ack: AcknowledgeAlarmsEvent) -> Result<()> {
        sqlx::query("INSERT INTO alarm_acknowledgements (ts, device_id, actor) VALUES (?, ?, ?)")
            .bind(ack.ts)
            .bind(ack.device_id)
            .bind(&ack.actor)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn unacknowledged_alarms(&self) -> Result<Vec<AlarmEvent>> {
        let rows = sqlx::query_as::<_, AlarmRow>(
            "SELECT e.ts, e.device_id, e.path, e.value, e.ts_end
             FROM alarm_events e
             WHERE e.value = 1
               AND (e.ts_end IS NULL OR NOT EXISTS (
                    SELECT 1 FROM alarm_acknowledgements a
                    WHERE a.ts > e.ts_end
                      AND (a.device_id IS NULL OR a.device_id = e.device_id)
               ))
             ORDER BY e.id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(alarm_from_row).collect())
    }

    async fn alarm_events(&self, device_id: Option<i64>) -> Result<Vec<AlarmEvent>> {
        let rows = sqlx::query_as::<_, AlarmRow>(
            "SELECT ts, device_id, path, value, ts_end FROM alarm_events
             WHERE (?1 IS NULL OR device_id = ?1) ORDER BY id",
        )
        .bind(device_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(alarm_from_row).collect())
    }

    async fn parameter_events(&self, device_id: i64) -> Result<Vec<ParameterChangeEvent>> {
        let rows = sqlx::query_as::<_, (DateTime<Utc>, String, String)>(
            "SELECT ts, path, value FROM parameter_events WHERE device_id = ? ORDER BY id",
        )
        .bind(device_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(|(ts, path, value)| {
                Ok(ParameterChangeEvent {
                    ts,
                    device_id,
                    path,
                    value: from_json_text(&value)?,
                })
            })
            .collect()
    }

    async fn commands(&self, device_id: i64) -> Result<Vec<ParameterChangeCommand>> {
        let rows = sqlx::query_as::<_, (DateTime<Utc>, String, String, Option<String>)>(
            "SELECT ts, path, value, actor FROM parameter_commands WHERE device_id = ? ORDER BY id",
        )
        .bind(device_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(|(ts, path, value, actor)| {
                Ok(ParameterChangeCommand {
                    ts,
                    device_id,
                    path,
                    value: from_json_text(&value)?,
                    actor,
                })
            })
            .collect()
    }
}

#[async_trait]
impl HistoricalSink for SqliteStore {
    async fn insert_numeric(&self, rows: Vec<NumericSample>) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let total = rows.len();
        let mut tx = self.pool().begin().await?;
        for batch in rows.chunks(INSERT_BATCH) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO numeric_samples (ts, device_id, path, value) ");
            builder.push_values(batch, |mut b, row| {
                b.push_bind(row.ts)
                    .push_bind(row.device_id)
                    .push_bind(row.path.clone())
                    .push_bind(row.value);
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!("numeric samples: {}", total);
        Ok(total)
    }

    async fn insert_bool_on_change(&self, sample: BoolSample) -> Result<bool> {
        let last: Option<bool> = sqlx::query_scalar(
            "SELECT value FROM bool_samples WHERE device_id = ? AND path = ?
             ORDER BY id DESC LIMIT 1",
        )
        .bind(sample.device_id)
        .bind(&sample.path)
        .fetch_optional(self.pool())
        .await?;

        if last == Some(sample.value) {
            return Ok(false);
        }

        sqlx::query("INSERT INTO bool_samples (ts, device_id, path, value) VALUES (?, ?, ?, ?)")
            .bind(sample.ts)
            .bind(sample.device_id)
            .bind(&sample.path)
            .bind(sample.value)
            .execute(self.pool())
            .await?;
        Ok(true)
    }

    async fn numeric_samples(&self, device_id: i64, path: &str) -> Result<Vec<NumericSample>> {
        let rows = sqlx::query_as::<_, (DateTime<Utc>, f64)>(
            "SELECT ts, value FROM numeric_samples WHERE device_id = ? AND path = ?
             ORDER BY rowid",
        )
        .bind(device_id)
        .bind(path)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(ts, value)| NumericSample {
                ts,
                device_id,
                path: path.to_string(),
                value,
            })
            .collect())
    }

    async fn bool_samples(&self, device_id: i64, path: &str) -> Result<Vec<BoolSample>> {
        let rows = sqlx::query_as::<_, (DateTime<Utc>, bool)>(
            "SELECT ts, value FROM bool_samples WHERE device_id = ? AND path = ? ORDER BY id",
        )
        .bind(device_id)
        .bind(path)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(ts, value)| BoolSample {
                ts,
                device_id,
                path: path.to_string(),
                value,
            })
            .collect())
    }
}

#[async_trait]
impl Catalogue for SqliteStore {
    async fn list(&self, kind: CatalogueKind) -> Result<Vec<CatalogueEntry>> {
        let rows = sqlx::query_as::<_, (String, String, bool)>(
            "SELECT path, value_type, enabled FROM catalogue WHERE kind = ? ORDER BY path",
        )
        .bind(kind.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(|(path, value_type, enabled)| {
                Ok(CatalogueEntry {
                    kind,
                    path,
                    value_type: value_type.parse::<ValueType>()?,
                    enabled,
                })
            })
            .collect()
    }

    async fn insert_missing(&self, entries: Vec<CatalogueEntry>) -> Result<usize> {
        let mut tx = self.pool().begin().await?;
        let mut inserted = 0u64;
        for entry in &entries {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO catalogue (kind, path, value_type, enabled)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(entry.kind.as_str())
            .bind(&entry.path)
            .bind(entry.value_type.as_str())
            .bind(entry.enabled)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        if inserted > 0 {
            self.catalogue_version.send_modify(|v| *v += 1);
        }
        Ok(inserted as usize)
    }

    async fn set_enabled(&self, kind: CatalogueKind, path: &str, enabled: bool) -> Result<()> {
        let result = sqlx::query("UPDATE catalogue SET enabled = ? WHERE kind = ? AND path = ?")
            .bind(enabled)
            .bind(kind.as_str())
            .bind(path)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(ColdroomError::NotFound {
                resource: format!("{kind} {path}"),
            });
        }
        self.catalogue_version.send_modify(|v| *v += 1);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.catalogue_version.subscribe()
    }
}

#[async_trait]
impl DeviceCatalogue for SqliteStore {
    async fn list_devices(&self) -> Result<Vec<DeviceConfig>> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            "SELECT id, name, host, port, unit, address,
                    enable_co2_proportional_ctrl, enable_c2h4_proportional_ctrl
             FROM devices ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(|(id, name, host, port, unit, address, co2, c2h4)| {
                Ok(DeviceConfig {
                    id,
                    name,
                    host,
                    port: column_u16(port, "port")?,
                    unit: u8::try_from(unit).map_err(|_| {
                        ColdroomError::Database(format!("unit out of range: {unit}"))
                    })?,
                    address: u32::try_from(address).map_err(|_| {
                        ColdroomError::Database(format!("address out of range: {address}"))
                    })?,
                    enable_co2_proportional_ctrl: co2,
                    enable_c2h4_proportional_ctrl: c2h4,
                })
            })
            .collect()
    }

    async fn replace_devices(&self, devices: Vec<DeviceConfig>) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM devices").execute(&mut *tx).await?;
        for device in &devices {
            sqlx::query(
                "INSERT INTO devices (id, name, host, port, unit, address,
                    enable_co2_proportional_ctrl, enable_c2h4_proportional_ctrl)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(device.id)
            .bind(&device.name)
            .bind(&device.host)
            .bind(i64::from(device.port))
            .bind(i64::from(device.unit))
            .bind(i64::from(device.address))
            .bind(device.enable_co2_proportional_ctrl)
            .bind(device.enable_c2h4_proportional_ctrl)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!("Device catalogue replaced: {} devices", devices.len());
        self.device_version.send_modify(|v| *v += 1);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.device_version.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn test_events_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t0 = Utc::now();

        for (device_id, path) in [(1, "door1Blocked"), (2, "door2Blocked")] {
            store
                .append_alarm(AlarmEvent {
                    ts: t0,
                    device_id,
                    path: path.into(),
                    value: true,
                    ts_end: None,
                })
                .await
                .unwrap();
        }
        assert_eq!(store.alarm_events(Some(1)).await.unwrap().len(), 1);
        assert_eq!(store.unacknowledged_alarms().await.unwrap().len(), 2);

        for device_id in [1, 2] {
            let path = format!("door{device_id}Blocked");
            assert!(store
                .close_alarm(device_id, &path, t0 + Duration::seconds(1))
                .await
                .unwrap());
        }
        store
            .append_acknowledgement(AcknowledgeAlarmsEvent {
                ts: t0 + Duration::seconds(2),
                device_id: Some(1),
                actor: Some("operator".into()),
            })
            .await
            .unwrap();
        let pending = store.unacknowledged_alarms().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].device_id, 2);
        assert!(pending[0].ts_end.is_some());

        let param = |value| ParameterChangeEvent {
            ts: t0,
            device_id: 1,
            path: "pidHumidity.pCoefficient".into(),
            value,
        };
        assert!(store.save_parameter_on_change(param(json!(10))).await.unwrap());
        assert!(!store.save_parameter_on_change(param(json!(10))).await.unwrap());
        assert!(store.save_parameter_on_change(param(json!(12))).await.unwrap());
        assert_eq!(store.parameter_events(1).await.unwrap().len(), 2);

        store
            .append_command(ParameterChangeCommand {
                ts: t0,
                device_id: 1,
                path: "onOffSystem".into(),
                value: json!(true),
                actor: None,
            })
            .await
            .unwrap();
        let commands = store.commands(1).await.unwrap();
        assert_eq!(commands[0].value, json!(true));
        assert!(commands[0].actor.is_none());
    }

    #[tokio::test]
    async fn test_acknowledgement_while_active_keeps_alarm_listed() {
        let store = SqliteStore::in_memory().await.unwrap();
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
            actor: None,
        };

        store.append_acknowledgement(ack(1)).await.unwrap();
        assert_eq!(store.unacknowledged_alarms().await.unwrap().len(), 1);

        // Falls after the acknowledgement: still pending
        store
            .close_alarm(1, "door1Blocked", t0 + Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(store.unacknowledged_alarms().await.unwrap().len(), 1);

        store.append_acknowledgement(ack(3)).await.unwrap();
        assert!(store.unacknowledged_alarms().await.unwrap().is_empty());

        // A second activation is a new row
        store
            .append_alarm(AlarmEvent {
                ts: t0 + Duration::seconds(4),
                device_id: 1,
                path: "door1Blocked".into(),
                value: true,
                ts_end: None,
            })
            .await
            .unwrap();
        let pending = store.unacknowledged_alarms().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].ts_end.is_none());
    }

    #[tokio::test]
    async fn test_history_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let rows: Vec<NumericSample> = (0..450)
            .map(|i| NumericSample {
                ts: Utc::now(),
                device_id: 1,
                path: "temperatureInside".into(),
                value: f64::from(i),
            })
            .collect();
        assert_eq!(store.insert_numeric(rows).await.unwrap(), 450);
        let stored = store.numeric_samples(1, "temperatureInside").await.unwrap();
        assert_eq!(stored.len(), 450);
        assert_eq!(stored[449].value, 449.0);

        let sample = |value| BoolSample {
            ts: Utc::now(),
            device_id: 1,
            path: "onOffSystem".into(),
            value,
        };
        assert!(store.insert_bool_on_change(sample(false)).await.unwrap());
        assert!(!store.insert_bool_on_change(sample(false)).await.unwrap());
        assert!(store.insert_bool_on_change(sample(true)).await.unwrap());
        assert_eq!(store.bool_samples(1, "onOffSystem").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_catalogues_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let entry = CatalogueEntry {
            kind: CatalogueKind::Measurement,
            path: "CO2Measure".into(),
            value_type: ValueType::Int,
            enabled: false,
        };
        assert_eq!(store.insert_missing(vec![entry.clone()]).await.unwrap(), 1);
        assert_eq!(store.insert_missing(vec![entry]).await.unwrap(), 0);
        store
            .set_enabled(CatalogueKind::Measurement, "CO2Measure", true)
            .await
            .unwrap();
        let listed = store.list(CatalogueKind::Measurement).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].enabled);
        assert_eq!(listed[0].value_type, ValueType::Int);

        let mut rx = DeviceCatalogue::subscribe(&store);
        let mut device = DeviceConfig::new(7, "Cámara 7", "10.0.0.7", 502);
        device.enable_c2h4_proportional_ctrl = true;
        store.replace_devices(vec![device.clone()]).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(store.list_devices().await.unwrap(), vec![device]);
    }
}

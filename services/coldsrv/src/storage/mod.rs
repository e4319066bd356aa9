//! Event, history and catalogue storage
//!
//! The engine only sees the traits below. Two backends exist: in-memory
//! (`memory`) for tests and diskless setups, and SQLite (`sqlite`).

mod memory;
mod sqlite;
mod types;

pub use memory::{MemoryCatalogue, MemoryDeviceCatalogue, MemoryEventStore, MemoryHistoricalSink};
pub use sqlite::SqliteStore;
pub use types::{
    AcknowledgeAlarmsEvent, AlarmEvent, BoolSample, CatalogueEntry, CatalogueKind,
    NumericSample, ParameterChangeCommand, ParameterChangeEvent, ValueType,
};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use errors::Result;
use tokio::sync::watch;

use crate::config::DeviceConfig;

/// Append-only event log with save-on-change parameters
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append_alarm(&self, event: AlarmEvent) -> Result<()>;

    /// Set `ts_end` on the open activation of (device, path). Returns
    /// whether one was open.
    async fn close_alarm(&self, device_id: i64, path: &str, ts: DateTime<Utc>) -> Result<bool>;

    /// Store the event unless the last stored value for (device, path)
    /// is the same. Returns whether a row was written.
    async fn save_parameter_on_change(&self, event: ParameterChangeEvent) -> Result<bool>;

    async fn append_command(&self, command: ParameterChangeCommand) -> Result<()>;

    async fn append_acknowledgement(&self, ack: AcknowledgeAlarmsEvent) -> Result<()>;

    /// Activations still raised, or ended but not acknowledged since
    async fn unacknowledged_alarms(&self) -> Result<Vec<AlarmEvent>>;

    async fn alarm_events(&self, device_id: Option<i64>) -> Result<Vec<AlarmEvent>>;

    async fn parameter_events(&self, device_id: i64) -> Result<Vec<ParameterChangeEvent>>;

    async fn commands(&self, device_id: i64) -> Result<Vec<ParameterChangeCommand>>;
}

/// Time-series measurements
#[async_trait]
pub trait HistoricalSink: Send + Sync {
    /// Bulk insert; returns the number of rows written
    async fn insert_numeric(&self, rows: Vec<NumericSample>) -> Result<usize>;

    /// Store the sample unless it repeats the last stored value for
    /// (device, path). Returns whether a row was written.
    async fn insert_bool_on_change(&self, sample: BoolSample) -> Result<bool>;

    async fn numeric_samples(&self, device_id: i64, path: &str) -> Result<Vec<NumericSample>>;

    async fn bool_samples(&self, device_id: i64, path: &str) -> Result<Vec<BoolSample>>;
}

/// Which measurements, alarms and parameters get recorded
#[async_trait]
pub trait Catalogue: Send + Sync {
    async fn list(&self, kind: CatalogueKind) -> Result<Vec<CatalogueEntry>>;

    /// Insert entries whose (kind, path) is unknown; existing ones are left
    /// untouched. Returns how many were inserted.
    async fn insert_missing(&self, entries: Vec<CatalogueEntry>) -> Result<usize>;

    async fn set_enabled(&self, kind: CatalogueKind, path: &str, enabled: bool) -> Result<()>;

    /// Bumped on every change
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// The set of polled devices
#[async_trait]
pub trait DeviceCatalogue: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<DeviceConfig>>;

    async fn replace_devices(&self, devices: Vec<DeviceConfig>) -> Result<()>;

    /// Bumped on every change
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// The stores an engine writes to, behind their traits
#[derive(Clone)]
pub struct Stores {
    pub events: Arc<dyn EventStore>,
    pub history: Arc<dyn HistoricalSink>,
    pub catalogue: Arc<dyn Catalogue>,
    pub devices: Arc<dyn DeviceCatalogue>,
}

impl Stores {
    /// Volatile stores seeded with `devices`
    pub fn in_memory(devices: Vec<DeviceConfig>) -> Self {
        Self {
            events: Arc::new(MemoryEventStore::new()),
            history: Arc::new(MemoryHistoricalSink::new()),
            catalogue: Arc::new(MemoryCatalogue::new()),
            devices: Arc::new(MemoryDeviceCatalogue::new(devices)),
        }
    }

    /// Every store backed by the same SQLite database
    pub fn sqlite(store: Arc<SqliteStore>) -> Self {
        Self {
            events: store.clone(),
            history: store.clone(),
            catalogue: store.clone(),
            devices: store,
        }
    }
}

//! Periodic polling of all devices
//!
//! One driver task runs [`PollingEngine::run`]. Each tick:
//!
//! 1. reads every device concurrently;
//! 2. publishes a [`BroadcastPayload`];
//! 3. records enabled measurements;
//! 4. records alarm edges and changed parameters;
//! 5. re-applies the proportional-control policy.
//!
//! Device-list changes rebuild the clients at the start of the next tick.

pub mod payload;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use coldroom_memmap::{FieldDescriptor, MemoryMapSchema, Value};
use coldroom_modbus::Connector;
use dashmap::DashMap;
use errors::{ColdroomError, Result};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::config::{DeviceConfig, PollingConfig};
use crate::device::{ClientResources, DeviceClient, DeviceNotification, DeviceState};
use crate::storage::{
    AcknowledgeAlarmsEvent, AlarmEvent, BoolSample, CatalogueEntry, CatalogueKind,
    NumericSample, ParameterChangeEvent, Stores,
};

pub use payload::{AlarmSummary, BroadcastPayload};

/// Shared handle used by the API and the driver task
pub type EngineHandle = Arc<PollingEngine>;

const PAYLOAD_CHANNEL_CAPACITY: usize = 16;
const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// Catalogue paths currently enabled, per kind
#[derive(Debug, Default, Clone)]
struct EnabledPaths {
    measurements: Vec<String>,
    alarms: Vec<String>,
    parameters: Vec<String>,
}

/// What one tick did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickStats {
    pub devices: usize,
    pub failed_reads: usize,
    pub numeric_rows: usize,
    pub bool_rows: usize,
    pub alarm_events: usize,
    pub parameter_events: usize,
}

/// Device entry as listed by the API
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeviceStatus {
    #[serde(flatten)]
    pub config: DeviceConfig,
    pub state: DeviceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct PollingEngine {
    schema: Arc<MemoryMapSchema>,
    period: Duration,
    stores: Stores,
    connector: Arc<dyn Connector>,
    /// Root of every client's cancellation token
    shutdown: CancellationToken,
    generation: Mutex<CancellationToken>,
    clients: RwLock<Vec<Arc<DeviceClient>>>,
    enabled: RwLock<EnabledPaths>,
    /// Last observed alarm value per (device, path); outlives client rebuilds
    last_alarm_state: DashMap<(i64, String), bool>,
    /// Last parameter value handed to the event store per (device, path)
    last_parameter: DashMap<(i64, String), JsonValue>,
    latest: RwLock<Option<Arc<BroadcastPayload>>>,
    payloads: broadcast::Sender<Arc<BroadcastPayload>>,
    notifications: broadcast::Sender<DeviceNotification>,
    restart_required: AtomicBool,
    catalogue_changed: AtomicBool,
}

impl PollingEngine {
    pub fn new(
        schema: Arc<MemoryMapSchema>,
        polling: &PollingConfig,
        stores: Stores,
        connector: Arc<dyn Connector>,
    ) -> EngineHandle {
        let shutdown = CancellationToken::new();
        let (payloads, _) = broadcast::channel(PAYLOAD_CHANNEL_CAPACITY);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Arc::new(Self {
            schema,
            period: polling.period(),
            stores,
            connector,
            generation: Mutex::new(shutdown.child_token()),
            shutdown,
            clients: RwLock::new(Vec::new()),
            enabled: RwLock::new(EnabledPaths::default()),
            last_alarm_state: DashMap::new(),
            last_parameter: DashMap::new(),
            latest: RwLock::new(None),
            payloads,
            notifications,
            restart_required: AtomicBool::new(false),
            catalogue_changed: AtomicBool::new(false),
        })
    }

    pub fn schema(&self) -> &Arc<MemoryMapSchema> {
        &self.schema
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn clients(&self) -> Vec<Arc<DeviceClient>> {
        self.clients.read().clone()
    }

    pub fn client(&self, device_id: i64) -> Result<Arc<DeviceClient>> {
        self.clients
            .read()
            .iter()
            .find(|c| c.id() == device_id)
            .cloned()
            .ok_or(ColdroomError::DeviceNotFound(device_id))
    }

    pub fn devices(&self) -> Vec<DeviceStatus> {
        self.clients()
            .iter()
            .map(|c| DeviceStatus {
                config: c.config().clone(),
                state: c.state(),
                error: c.error(),
            })
            .collect()
    }

    /// Live payloads, one per tick
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BroadcastPayload>> {
        self.payloads.subscribe()
    }

    /// Device error transitions
    pub fn notifications(&self) -> broadcast::Receiver<DeviceNotification> {
        self.notifications.subscribe()
    }

    /// Rebuild the clients at the start of the next tick
    pub fn request_restart(&self) {
        self.restart_required.store(true, Ordering::SeqCst);
    }

    /// Reconcile and reload the catalogue at the start of the next tick
    pub fn notify_catalogue_changed(&self) {
        self.catalogue_changed.store(true, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Startup and reinitialization
    // ------------------------------------------------------------------

    /// Reconcile the catalogue, then build and initialize the clients
    pub async fn initialize(&self) -> Result<()> {
        self.reconcile_catalogue().await?;
        self.reinitialize().await
    }

    /// Drop every client and build new ones from the device catalogue
    pub async fn reinitialize(&self) -> Result<()> {
        let devices = self.stores.devices.list_devices().await?;

        let token = {
            let mut generation = self.generation.lock();
            generation.cancel();
            *generation = self.shutdown.child_token();
            generation.clone()
        };

        let resources = ClientResources {
            connector: self.connector.clone(),
            events: self.stores.events.clone(),
            notifications: self.notifications.clone(),
        };
        let clients: Vec<Arc<DeviceClient>> = devices
            .into_iter()
            .map(|config| {
                Arc::new(DeviceClient::new(
                    config,
                    self.schema.clone(),
                    resources.clone(),
                    token.child_token(),
                ))
            })
            .collect();

        let old = std::mem::replace(&mut *self.clients.write(), clients.clone());
        join_all(old.iter().map(|c| c.shutdown())).await;

        let ids: HashSet<i64> = clients.iter().map(|c| c.id()).collect();
        self.last_alarm_state.retain(|(id, _), _| ids.contains(id));
        self.last_parameter.retain(|(id, _), _| ids.contains(id));

        info!("Init {} devices", clients.len());
        let results = join_all(clients.iter().map(|c| c.initialize())).await;
        for (client, result) in clients.iter().zip(results) {
            if let Err(e) = result {
                warn!("Device {} init failed: {}", client.id(), e);
            }
        }
        Ok(())
    }

    /// Add every alarm, parameter and measurement path the catalogue lacks,
    /// disabled, then reload the enabled paths
    pub async fn reconcile_catalogue(&self) -> Result<usize> {
        let entries = |kind: CatalogueKind, fields: Vec<&FieldDescriptor>| {
            fields
                .into_iter()
                .map(move |f| CatalogueEntry {
                    kind,
                    path: f.path.clone(),
                    value_type: f.field_type.into(),
                    enabled: false,
                })
                .collect::<Vec<_>>()
        };
        let mut missing = entries(CatalogueKind::Alarm, self.schema.alarm_fields());
        missing.extend(entries(
            CatalogueKind::Parameter,
            self.schema.parameter_fields(),
        ));
        missing.extend(entries(
            CatalogueKind::Measurement,
            self.schema.measurement_fields(),
        ));

        let inserted = self.stores.catalogue.insert_missing(missing).await?;
        if inserted > 0 {
            info!("Catalogue: {} new entries", inserted);
        }
        self.reload_enabled().await?;
        Ok(inserted)
    }

    async fn reload_enabled(&self) -> Result<()> {
        let enabled = |entries: Vec<CatalogueEntry>| {
            entries
                .into_iter()
                .filter(|e| e.enabled)
                .map(|e| e.path)
                .collect::<Vec<_>>()
        };
        let catalogue = &self.stores.catalogue;
        let paths = EnabledPaths {
            measurements: enabled(catalogue.list(CatalogueKind::Measurement).await?),
            alarms: enabled(catalogue.list(CatalogueKind::Alarm).await?),
            parameters: enabled(catalogue.list(CatalogueKind::Parameter).await?),
        };
        debug!(
            "Enabled: {} measurements, {} alarms, {} parameters",
            paths.measurements.len(),
            paths.alarms.len(),
            paths.parameters.len()
        );
        *self.enabled.write() = paths;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    pub async fn tick(&self) -> TickStats {
        if self.restart_required.swap(false, Ordering::SeqCst) {
            info!("Device list changed, reinit");
            if let Err(e) = self.reinitialize().await {
                error!("Reinit failed: {}", e);
                self.request_restart();
            }
        }
        if self.catalogue_changed.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.reconcile_catalogue().await {
                error!("Catalogue reload failed: {}", e);
            }
        }

        let clients = self.clients();
        let mut stats = TickStats {
            devices: clients.len(),
            ..Default::default()
        };

        let reads = join_all(clients.iter().map(|c| c.read())).await;
        stats.failed_reads = reads.iter().filter(|r| r.is_err()).count();

        match self.build_payload(&clients).await {
            Ok(payload) => self.publish(payload),
            Err(e) => error!("Payload build failed: {}", e),
        }

        let ts = Utc::now();
        let healthy: Vec<&Arc<DeviceClient>> =
            clients.iter().filter(|c| !c.is_in_error()).collect();
        let enabled = self.enabled.read().clone();

        match self.save_measurements(ts, &healthy, &enabled).await {
            Ok((numeric, bools)) => {
                stats.numeric_rows = numeric;
                stats.bool_rows = bools;
            },
            Err(e) => error!("Measurement save failed: {}", e),
        }
        match self.save_alarm_events(ts, &healthy, &enabled).await {
            Ok(n) => stats.alarm_events = n,
            Err(e) => error!("Alarm save failed: {}", e),
        }
        match self.save_parameter_events(ts, &healthy, &enabled).await {
            Ok(n) => stats.parameter_events = n,
            Err(e) => error!("Parameter save failed: {}", e),
        }

        self.apply_constraints(&clients).await;
        stats
    }

    /// Tick until `shutdown` fires, then close every client
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut device_changes = self.stores.devices.subscribe();
        let mut catalogue_changes = self.stores.catalogue.subscribe();

        if let Err(e) = self.initialize().await {
            error!("Engine init failed: {}", e);
            self.request_restart();
        }
        // Changes made by our own reconciliation are already applied
        let _ = catalogue_changes.borrow_and_update();
        info!("Polling every {:?}", self.period);

        loop {
            let started = tokio::time::Instant::now();
            let stats = self.tick().await;
            let elapsed = started.elapsed();
            debug!("Tick {:?}: {:?}", elapsed, stats);

            let deadline = started + self.period.max(elapsed);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        self.stop().await;
                        return;
                    },
                    _ = tokio::time::sleep_until(deadline) => break,
                    Ok(()) = device_changes.changed() => self.request_restart(),
                    Ok(()) = catalogue_changes.changed() => self.notify_catalogue_changed(),
                }
            }
        }
    }

    /// Cancel in-flight work and close all connections
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let clients = self.clients();
        join_all(clients.iter().map(|c| c.shutdown())).await;
        info!("Engine stopped");
    }

    fn publish(&self, payload: BroadcastPayload) {
        let payload = Arc::new(payload);
        *self.latest.write() = Some(payload.clone());
        // No subscribers is fine
        let _ = self.payloads.send(payload);
    }

    async fn build_payload(&self, clients: &[Arc<DeviceClient>]) -> Result<BroadcastPayload> {
        let structs = clients.iter().map(|c| payload::device_struct(c)).collect();
        let alarms = self
            .stores
            .events
            .unacknowledged_alarms()
            .await?
            .into_iter()
            .map(|event| {
                let client = clients.iter().find(|c| c.id() == event.device_id);
                let description = self
                    .schema
                    .get_field(&event.path)
                    .map(|f| f.description.clone())
                    .unwrap_or_default();
                AlarmSummary::new(event, client.map(|c| c.as_ref()), description)
            })
            .collect();
        let messages = clients.iter().flat_map(|c| c.messages()).collect();

        Ok(BroadcastPayload {
            ts: Utc::now(),
            structs,
            alarms,
            messages,
        })
    }

    /// Numeric values in one bulk insert, bools only when they change
    async fn save_measurements(
        &self,
        ts: DateTime<Utc>,
        clients: &[&Arc<DeviceClient>],
        enabled: &EnabledPaths,
    ) -> Result<(usize, usize)> {
        let mut numeric = Vec::new();
        let mut bools = Vec::new();
        for client in clients {
            let Some(snapshot) = client.current() else {
                continue;
            };
            for path in &enabled.measurements {
                match snapshot.get(path) {
                    Ok(Value::Bool(value)) => bools.push(BoolSample {
                        ts,
                        device_id: client.id(),
                        path: path.clone(),
                        value,
                    }),
                    Ok(value) => match value.as_f64() {
                        Some(v) if v.is_finite() => numeric.push(NumericSample {
                            ts,
                            device_id: client.id(),
                            path: path.clone(),
                            value: v,
                        }),
                        _ => {},
                    },
                    Err(_) => {},
                }
            }
        }

        let numeric_rows = self.stores.history.insert_numeric(numeric).await?;
        let mut bool_rows = 0;
        for sample in bools {
            if self.stores.history.insert_bool_on_change(sample).await? {
                bool_rows += 1;
            }
        }
        Ok((numeric_rows, bool_rows))
    }

    /// One event per observed rising edge
    async fn save_alarm_events(
        &self,
        ts: DateTime<Utc>,
        clients: &[&Arc<DeviceClient>],
        enabled: &EnabledPaths,
    ) -> Result<usize> {
        let mut rising = Vec::new();
        let mut falling = Vec::new();
        for client in clients {
            let Some(snapshot) = client.current() else {
                continue;
            };
            for path in &enabled.alarms {
                let Ok(value) = snapshot.get_bool(path) else {
                    continue;
                };
                let last = self
                    .last_alarm_state
                    .insert((client.id(), path.clone()), value)
                    .unwrap_or(false);
                if value && !last {
                    rising.push(AlarmEvent {
                        ts,
                        device_id: client.id(),
                        path: path.clone(),
                        value,
                        ts_end: None,
                    });
                } else if !value && last {
                    falling.push((client.id(), path.clone()));
                }
            }
        }

        for (device_id, path) in falling {
            info!("Alarm {} cleared on device {}", path, device_id);
            self.stores.events.close_alarm(device_id, &path, ts).await?;
        }
        let count = rising.len();
        for event in rising {
            warn!("Alarm {} on device {}", event.path, event.device_id);
            self.stores.events.append_alarm(event).await?;
        }
        Ok(count)
    }

    async fn save_parameter_events(
        &self,
        ts: DateTime<Utc>,
        clients: &[&Arc<DeviceClient>],
        enabled: &EnabledPaths,
    ) -> Result<usize> {
        let mut saved = 0;
        for client in clients {
            let Some(snapshot) = client.current() else {
                continue;
            };
            for path in &enabled.parameters {
                let Ok(value) = snapshot.get(path) else {
                    continue;
                };
                let value = value.to_json(true);
                let key = (client.id(), path.clone());
                if self
                    .last_parameter
                    .get(&key)
                    .is_some_and(|last| *last == value)
                {
                    continue;
                }
                let event = ParameterChangeEvent {
                    ts,
                    device_id: client.id(),
                    path: path.clone(),
                    value: value.clone(),
                };
                if self.stores.events.save_parameter_on_change(event).await? {
                    saved += 1;
                }
                self.last_parameter.insert(key, value);
            }
        }
        Ok(saved)
    }

    async fn apply_constraints(&self, clients: &[Arc<DeviceClient>]) {
        let ready = clients.iter().filter(|c| c.state() == DeviceState::Ready);
        let results = join_all(ready.map(|c| async move { (c.id(), c.apply_constraints().await) }))
            .await;
        for (device_id, result) in results {
            if let Err(e) = result {
                warn!("Device {} constraints: {}", device_id, e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    pub async fn write(
        &self,
        device_id: i64,
        path: &str,
        value: &JsonValue,
        actor: Option<&str>,
    ) -> Result<bool> {
        self.client(device_id)?.write(path, value, actor).await
    }

    pub fn accept_message(&self, device_id: i64, message_id: &str) -> bool {
        self.client(device_id)
            .map(|c| c.accept_message(message_id))
            .unwrap_or(false)
    }

    pub async fn answer_message(
        &self,
        device_id: i64,
        message_id: &str,
        yes: bool,
        actor: Option<&str>,
    ) -> Result<bool> {
        self.client(device_id)?
            .answer_message(message_id, yes, actor)
            .await
    }

    /// Acknowledge every alarm so far, of one device or of all
    pub async fn acknowledge_alarms(
        &self,
        device_id: Option<i64>,
        actor: Option<String>,
    ) -> Result<()> {
        if let Some(id) = device_id {
            self.client(id)?;
        }
        info!(
            "Alarms acknowledged: device={:?} by {}",
            device_id,
            actor.as_deref().unwrap_or("unknown")
        );
        self.stores
            .events
            .append_acknowledgement(AcknowledgeAlarmsEvent {
                ts: Utc::now(),
                device_id,
                actor,
            })
            .await
    }

    /// Latest published payload, or one built now before the first tick
    pub async fn snapshot(&self) -> Result<Arc<BroadcastPayload>> {
        let latest = self.latest.read().clone();
        if let Some(latest) = latest {
            return Ok(latest);
        }
        let clients = self.clients();
        Ok(Arc::new(self.build_payload(&clients).await?))
    }
}

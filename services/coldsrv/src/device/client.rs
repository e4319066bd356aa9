//! One controller: its connection, its snapshots and its write path

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use coldroom_memmap::{
    encode_value, with_bit, Codec, DeviceSnapshot, FieldDescriptor, MemoryMapSchema, Tag, Value,
};
use coldroom_modbus::{read_registers, write_registers as write_block, Connector, RegisterTransport};
use errors::{ColdroomError, Result};
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{self, DeviceMessage};
use super::state::{DeviceNotification, DeviceState, ErrorFlag};
use crate::config::DeviceConfig;
use crate::storage::{EventStore, ParameterChangeCommand};

/// Register pair `[type marker, field offset]` that asks the controller to
/// persist a field to EEPROM
pub const EEPROM_TYPE_FIELD: &str = "eepromTypeToSave";

pub const CO2_CONTROL_SELECTION: &str = "CO2ControlSelection";
pub const C2H4_CONTROL_SELECTION: &str = "C2H4ControlSelection";

type Connection = Option<Box<dyn RegisterTransport>>;

/// Collaborators shared by every client of an engine
#[derive(Clone)]
pub struct ClientResources {
    pub connector: Arc<dyn Connector>,
    pub events: Arc<dyn EventStore>,
    pub notifications: broadcast::Sender<DeviceNotification>,
}

#[derive(Debug, Default)]
struct Snapshots {
    current: Option<Arc<DeviceSnapshot>>,
    previous: Option<Arc<DeviceSnapshot>>,
}

#[derive(Debug, Default)]
struct Status {
    state: DeviceState,
    error: ErrorFlag,
}

/// Client for one cold-room controller.
///
/// Snapshots are swapped in whole after a successful decode. The connection
/// lock serialises requests, so external writes interleave with polling
/// reads one request/response pair at a time.
pub struct DeviceClient {
    config: DeviceConfig,
    schema: Arc<MemoryMapSchema>,
    codec: Codec,
    resources: ClientResources,
    cancel: CancellationToken,
    connection: Mutex<Connection>,
    snapshots: RwLock<Snapshots>,
    status: SyncMutex<Status>,
    messages: SyncMutex<BTreeMap<String, DeviceMessage>>,
}

impl std::fmt::Debug for DeviceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceClient")
            .field("id", &self.config.id)
            .field("endpoint", &self.config.endpoint())
            .field("state", &self.state())
            .finish()
    }
}

impl DeviceClient {
    pub fn new(
        config: DeviceConfig,
        schema: Arc<MemoryMapSchema>,
        resources: ClientResources,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            codec: Codec::new(schema.clone()),
            config,
            schema,
            resources,
            cancel,
            connection: Mutex::new(None),
            snapshots: RwLock::new(Snapshots::default()),
            status: SyncMutex::new(Status::default()),
            messages: SyncMutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn id(&self) -> i64 {
        self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> DeviceState {
        self.status.lock().state
    }

    pub fn error(&self) -> Option<String> {
        self.status.lock().error.get().map(str::to_string)
    }

    pub fn is_in_error(&self) -> bool {
        self.status.lock().error.is_set()
    }

    /// Last committed snapshot
    pub fn current(&self) -> Option<Arc<DeviceSnapshot>> {
        self.snapshots.read().current.clone()
    }

    pub fn previous(&self) -> Option<Arc<DeviceSnapshot>> {
        self.snapshots.read().previous.clone()
    }

    /// Pending messages, ordered by id
    pub fn messages(&self) -> Vec<DeviceMessage> {
        self.messages.lock().values().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Connect, read once and enforce the proportional-control policy
    pub async fn initialize(&self) -> Result<()> {
        self.status.lock().state = DeviceState::Connecting;
        info!("Device {} init @ {}", self.config.id, self.config.endpoint());

        let outcome = self
            .cancellable(async {
                self.read_snapshot().await?;
                self.apply_constraints().await?;
                Ok(())
            })
            .await;

        match &outcome {
            Ok(()) if !self.is_in_error() => self.mark_ready(),
            Ok(()) => {},
            Err(e) => self.mark_error(e),
        }
        outcome
    }

    /// Stop in-flight work and close the connection
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.connection.lock().await.take();
        let mut status = self.status.lock();
        if status.state != DeviceState::Error {
            status.state = DeviceState::Disconnected;
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read the whole map and commit it as the current snapshot
    pub async fn read(&self) -> Result<Arc<DeviceSnapshot>> {
        let outcome = self.cancellable(self.read_snapshot()).await;
        match &outcome {
            Ok(_) => self.mark_ready(),
            Err(e) => self.mark_error(e),
        }
        outcome
    }

    async fn read_snapshot(&self) -> Result<Arc<DeviceSnapshot>> {
        let count = usize::from(self.schema.total_registers());
        let base = self.config.base_address();

        let registers = {
            let mut connection = self.connection().await?;
            let result = match connection.as_mut() {
                Some(transport) => read_registers(transport.as_mut(), base, count).await,
                None => Err(self.not_connected()),
            };
            Self::check_link(&mut connection, result)?
        };

        let snapshot = Arc::new(self.codec.decode(&registers)?);
        let previous = {
            let mut pair = self.snapshots.write();
            let previous = pair.current.replace(snapshot.clone());
            pair.previous = previous.clone();
            previous
        };
        self.raise_messages(previous.as_deref(), &snapshot);
        Ok(snapshot)
    }

    fn raise_messages(&self, previous: Option<&DeviceSnapshot>, current: &DeviceSnapshot) {
        let baseline;
        let previous = match previous {
            Some(previous) => previous,
            None => {
                baseline = DeviceSnapshot::new(self.schema.clone());
                &baseline
            },
        };
        let raised = messages::evaluate(&self.config, previous, current);
        if raised.is_empty() {
            return;
        }
        let mut pending = self.messages.lock();
        for message in raised {
            if message.log {
                warn!("{}: {}", self.config.name, message.text);
            } else {
                debug!("Device {} message {}", self.config.id, message.id);
            }
            pending.insert(message.id.clone(), message);
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write one field.
    ///
    /// `Ok(false)` when the device refused the request or the link failed;
    /// only link failures change the device state. Unknown paths and
    /// ill-typed values are errors.
    pub async fn write(&self, path: &str, value: &JsonValue, actor: Option<&str>) -> Result<bool> {
        let field = self.schema.get_field(path)?;
        let typed = Value::from_json(field.field_type, value)?;

        if field.has_tag(Tag::Param) {
            self.resources
                .events
                .append_command(ParameterChangeCommand {
                    ts: Utc::now(),
                    device_id: self.config.id,
                    path: field.path.clone(),
                    value: typed.to_json(true),
                    actor: actor.map(str::to_string),
                })
                .await?;
        }

        info!(
            "Write {}={} @ {} by {}",
            field.path,
            typed.to_json(true),
            self.config.endpoint(),
            actor.unwrap_or("system")
        );
        let outcome = self.cancellable(self.write_field(field, typed)).await;
        self.write_outcome(outcome)
    }

    /// Raw chunked write at `base + offset`
    pub async fn write_registers(&self, offset: u16, values: &[u16]) -> Result<bool> {
        let address = self.register_address(offset)?;
        let outcome = self
            .cancellable(async {
                let mut connection = self.connection().await?;
                let result = match connection.as_mut() {
                    Some(transport) => write_block(transport.as_mut(), address, values).await,
                    None => Err(self.not_connected()),
                };
                Self::check_link(&mut connection, result)
            })
            .await;
        self.write_outcome(outcome)
    }

    fn write_outcome(&self, outcome: Result<()>) -> Result<bool> {
        match outcome {
            Ok(()) => Ok(true),
            Err(e) if e.is_connection_fault() => {
                self.mark_error(&e);
                Ok(false)
            },
            Err(ColdroomError::ModbusException { function, code }) => {
                warn!(
                    "Device {} rejected write: fc=0x{:02X} code=0x{:02X}",
                    self.config.id, function, code
                );
                Ok(false)
            },
            Err(e) => Err(e),
        }
    }

    async fn write_field(&self, field: &FieldDescriptor, value: Value) -> Result<()> {
        let address = self.register_address(field.offset)?;
        let eeprom = if field.is_eeprom() {
            let slot = self.schema.get_field(EEPROM_TYPE_FIELD)?;
            Some(self.register_address(slot.offset)?)
        } else {
            None
        };

        let mut connection = self.connection().await?;
        let result = match connection.as_mut() {
            Some(transport) => {
                Self::write_on(transport.as_mut(), field, value, address, eeprom).await
            },
            None => Err(self.not_connected()),
        };
        Self::check_link(&mut connection, result)
    }

    async fn write_on(
        transport: &mut dyn RegisterTransport,
        field: &FieldDescriptor,
        value: Value,
        address: u16,
        eeprom: Option<u16>,
    ) -> Result<()> {
        let words = match (value, field.bit) {
            // Read-modify-write: the other 15 bits belong to other fields
            (Value::Bool(on), Some(bit)) => {
                let current = read_registers(transport, address, 1).await?;
                let register = current.first().copied().ok_or(ColdroomError::Decode {
                    expected: 1,
                    actual: 0,
                })?;
                vec![with_bit(register, bit, on)]
            },
            _ => encode_value(value),
        };
        write_block(transport, address, &words).await?;

        if let Some(slot) = eeprom {
            let request = [field.field_type.eeprom_marker(), field.offset];
            debug!("EEPROM save {} -> {:?}", field.path, request);
            write_block(transport, slot, &request).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Policy and messages
    // ------------------------------------------------------------------

    /// Disable proportional control modes the device is not licensed for.
    ///
    /// Returns false when a corrective write did not go through; the next
    /// call tries again.
    pub async fn apply_constraints(&self) -> Result<bool> {
        let Some(current) = self.current() else {
            return Ok(true);
        };
        let policy = [
            (CO2_CONTROL_SELECTION, self.config.enable_co2_proportional_ctrl),
            (C2H4_CONTROL_SELECTION, self.config.enable_c2h4_proportional_ctrl),
        ];

        let mut applied = true;
        for (path, allowed) in policy {
            if allowed || !current.get_bool(path).unwrap_or(false) {
                continue;
            }
            info!("Device {}: {} not enabled, forcing off", self.config.id, path);
            applied &= self.write(path, &JsonValue::Bool(false), None).await?;
        }
        Ok(applied)
    }

    /// Drop a pending message; false if there was none
    pub fn accept_message(&self, message_id: &str) -> bool {
        self.messages.lock().remove(message_id).is_some()
    }

    /// Apply the writes of the chosen answer, then drop the message
    pub async fn answer_message(
        &self,
        message_id: &str,
        yes: bool,
        actor: Option<&str>,
    ) -> Result<bool> {
        let message = { self.messages.lock().get(message_id).cloned() };
        let message = message.ok_or_else(|| ColdroomError::NotFound {
            resource: format!("message {} on device {}", message_id, self.config.id),
        })?;

        let mut written = true;
        for (path, value) in message.answer(yes) {
            written &= self.write(path, value, actor).await?;
        }
        self.accept_message(message_id);
        Ok(written)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn cancellable<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(ColdroomError::Cancelled(format!("device {}", self.config.id)))
            },
            result = work => result,
        }
    }

    /// Connection guard, connecting lazily
    async fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            let transport = self
                .resources
                .connector
                .connect(&self.config.host, self.config.port, self.config.unit)
                .await?;
            debug!("Device {} connected: {}", self.config.id, transport.endpoint());
            *guard = Some(transport);
        }
        Ok(guard)
    }

    /// Drop the connection after a link fault so the next request reconnects
    fn check_link<T>(connection: &mut Connection, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_connection_fault() {
                connection.take();
            }
        }
        result
    }

    fn not_connected(&self) -> ColdroomError {
        ColdroomError::NotConnected(self.config.endpoint())
    }

    fn register_address(&self, offset: u16) -> Result<u16> {
        self.config
            .base_address()
            .checked_add(offset)
            .ok_or_else(|| ColdroomError::OutOfRange {
                value: offset.to_string(),
                min: "0".to_string(),
                max: (u16::MAX - self.config.base_address()).to_string(),
            })
    }

    fn mark_ready(&self) {
        let cleared = {
            let mut status = self.status.lock();
            status.state = DeviceState::Ready;
            status.error.clear()
        };
        if cleared {
            info!("Device {} recovered", self.config.id);
            let _ = self
                .resources
                .notifications
                .send(DeviceNotification::ErrorCleared {
                    device_id: self.config.id,
                    name: self.config.name.clone(),
                });
        }
    }

    fn mark_error(&self, error: &ColdroomError) {
        let message = error.to_string();
        let raised = {
            let mut status = self.status.lock();
            status.state = DeviceState::Error;
            status.error.set(message.clone())
        };
        // A rebuild is not a device fault
        if matches!(error, ColdroomError::Cancelled(_)) {
            debug!("Device {} cancelled: {}", self.config.id, message);
            return;
        }
        if raised {
            warn!("Device {} error: {}", self.config.id, message);
            let _ = self
                .resources
                .notifications
                .send(DeviceNotification::ErrorRaised {
                    device_id: self.config.id,
                    name: self.config.name.clone(),
                    error: message,
                });
        } else {
            debug!("Device {} still failing: {}", self.config.id, message);
        }
    }
}

//! In-memory devices for tests of crates built on this one

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use errors::{ColdroomError, Result};
use parking_lot::Mutex;

use crate::constants::{MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};
use crate::transport::{Connector, RegisterTransport};

#[derive(Debug, Default)]
struct DeviceState {
    base: u16,
    registers: Vec<u16>,
    offline: bool,
    read_requests: usize,
    writes: Vec<(u16, Vec<u16>)>,
}

/// Register bank shared between a test and the transports it hands out
#[derive(Debug, Clone, Default)]
pub struct MemoryDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MemoryDevice {
    /// `size` registers answering from protocol address `base`
    pub fn new(base: u16, size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                base,
                registers: vec![0; size],
                ..Default::default()
            })),
        }
    }

    pub fn registers(&self) -> Vec<u16> {
        self.state.lock().registers.clone()
    }

    pub fn register(&self, offset: usize) -> u16 {
        self.state.lock().registers.get(offset).copied().unwrap_or(0)
    }

    pub fn set_register(&self, offset: usize, value: u16) {
        if let Some(slot) = self.state.lock().registers.get_mut(offset) {
            *slot = value;
        }
    }

    pub fn set_registers(&self, offset: usize, values: &[u16]) {
        let mut state = self.state.lock();
        let end = (offset + values.len()).min(state.registers.len());
        if offset < end {
            state.registers[offset..end].copy_from_slice(&values[..end - offset]);
        }
    }

    /// Offline devices refuse connections and time out on requests
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn read_requests(&self) -> usize {
        self.state.lock().read_requests
    }

    /// Every FC16 request as (offset, values), oldest first
    pub fn writes(&self) -> Vec<(u16, Vec<u16>)> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    fn is_offline(&self) -> bool {
        self.state.lock().offline
    }
}

/// Transport over a [`MemoryDevice`]
#[derive(Debug)]
pub struct MemoryTransport {
    device: MemoryDevice,
    endpoint: String,
}

impl MemoryTransport {
    pub fn new(device: MemoryDevice, endpoint: impl Into<String>) -> Self {
        Self {
            device,
            endpoint: endpoint.into(),
        }
    }

    fn span(state: &DeviceState, address: u16, quantity: usize) -> Result<std::ops::Range<usize>> {
        let start = usize::from(address.wrapping_sub(state.base));
        let end = start + quantity;
        if address < state.base || end > state.registers.len() {
            return Err(ColdroomError::ModbusException {
                function: 0x03,
                code: 0x02,
            });
        }
        Ok(start..end)
    }
}

#[async_trait]
impl RegisterTransport for MemoryTransport {
    async fn read_holding_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>> {
        if quantity == 0 || quantity > MAX_READ_REGISTERS {
            return Err(ColdroomError::ModbusException {
                function: 0x03,
                code: 0x03,
            });
        }
        let mut state = self.device.state.lock();
        if state.offline {
            return Err(ColdroomError::Timeout(self.endpoint.clone()));
        }
        state.read_requests += 1;
        let range = Self::span(&state, address, usize::from(quantity))?;
        Ok(state.registers[range].to_vec())
    }

    async fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> Result<()> {
        if values.is_empty() || values.len() > usize::from(MAX_WRITE_REGISTERS) {
            return Err(ColdroomError::ModbusException {
                function: 0x10,
                code: 0x03,
            });
        }
        let mut state = self.device.state.lock();
        if state.offline {
            return Err(ColdroomError::Timeout(self.endpoint.clone()));
        }
        let range = Self::span(&state, address, values.len())?;
        let offset = range.start as u16;
        state.registers[range].copy_from_slice(values);
        state.writes.push((offset, values.to_vec()));
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Connector resolving "host:port" to registered [`MemoryDevice`]s
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    devices: Arc<Mutex<HashMap<String, MemoryDevice>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, host: &str, port: u16, device: MemoryDevice) {
        self.devices.lock().insert(format!("{host}:{port}"), device);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        _unit_id: u8,
    ) -> Result<Box<dyn RegisterTransport>> {
        let endpoint = format!("{host}:{port}");
        let device = self.devices.lock().get(&endpoint).cloned();
        match device {
            Some(device) if !device.is_offline() => {
                Ok(Box::new(MemoryTransport::new(device, endpoint)))
            },
            _ => Err(ColdroomError::ConnectionFailed {
                endpoint,
                reason: "connection refused".to_string(),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::transport::{read_registers, write_registers};

    #[tokio::test]
    async fn test_memory_device_through_connector() {
        let device = MemoryDevice::new(1, 200);
        device.set_register(5, 42);
        let connector = MemoryConnector::new();
        connector.register("plc", 502, device.clone());

        let mut transport = connector.connect("plc", 502, 1).await.unwrap();
        let values = read_registers(transport.as_mut(), 1, 200).await.unwrap();
        assert_eq!(values[5], 42);
        assert_eq!(device.read_requests(), 2);

        write_registers(transport.as_mut(), 11, &[7, 8]).await.unwrap();
        assert_eq!(device.writes(), vec![(10, vec![7, 8])]);
        assert_eq!(device.register(10), 7);
    }

    #[tokio::test]
    async fn test_offline_device() {
        let device = MemoryDevice::new(1, 10);
        let connector = MemoryConnector::new();
        connector.register("plc", 502, device.clone());
        let mut transport = connector.connect("plc", 502, 1).await.unwrap();

        device.set_offline(true);
        let err = transport.read_holding_registers(1, 1).await.unwrap_err();
        assert!(err.is_connection_fault());
        assert!(connector.connect("plc", 502, 1).await.is_err());
        assert!(connector.connect("other", 502, 1).await.is_err());
    }
}

//! Shared helpers for the integration tests

#![allow(dead_code)]

pub mod simulator;

use std::sync::Arc;
use std::time::Duration;

use coldroom_memmap::{with_bit, MemoryMapSchema};
use coldroom_modbus::TcpConnector;
use coldsrv::config::{DeviceConfig, PollingConfig};
use coldsrv::storage::Stores;
use coldsrv::{EngineHandle, PollingEngine};

use simulator::ModbusSimulator;

pub fn schema() -> Arc<MemoryMapSchema> {
    MemoryMapSchema::bundled().unwrap()
}

/// Short timeouts so a silent device fails a tick quickly
pub fn fast_polling() -> PollingConfig {
    PollingConfig {
        period_ms: 50,
        request_timeout_ms: 200,
        connect_timeout_ms: 200,
    }
}

pub fn tcp_connector(polling: &PollingConfig) -> TcpConnector {
    TcpConnector {
        connect_timeout: polling.connect_timeout(),
        request_timeout: polling.request_timeout(),
    }
}

/// A simulated controller and the device entry pointing at it
pub async fn simulated_device(id: i64) -> (ModbusSimulator, DeviceConfig) {
    let config = DeviceConfig::new(id, format!("Cámara {id}"), "127.0.0.1", 0);
    let sim = ModbusSimulator::start(
        config.base_address(),
        usize::from(schema().total_registers()),
    )
    .await;
    let config = DeviceConfig {
        port: sim.port(),
        ..config
    };
    (sim, config)
}

/// Engine over in-memory stores talking TCP to the given devices
pub async fn tcp_engine(devices: Vec<DeviceConfig>) -> (EngineHandle, Stores) {
    let polling = fast_polling();
    let stores = Stores::in_memory(devices);
    let engine = PollingEngine::new(
        schema(),
        &polling,
        stores.clone(),
        Arc::new(tcp_connector(&polling)),
    );
    engine.initialize().await.unwrap();
    (engine, stores)
}

pub fn set_flag(sim: &ModbusSimulator, path: &str, on: bool) {
    let schema = schema();
    let field = schema.get_field(path).unwrap();
    let offset = usize::from(field.offset);
    sim.set_register(offset, with_bit(sim.register(offset), field.bit.unwrap(), on));
}

pub fn flag(sim: &ModbusSimulator, path: &str) -> bool {
    let schema = schema();
    let field = schema.get_field(path).unwrap();
    sim.register(usize::from(field.offset)) & (1 << field.bit.unwrap()) != 0
}

/// Poll `condition` every 20 ms until it holds or `timeout` passes
pub async fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

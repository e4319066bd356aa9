//! Modbus TCP access to cold-room controllers
//!
//! Only the two function codes the controllers need are implemented:
//! FC03 (read holding registers) and FC16 (write multiple registers).
//! Block transfers are split to the controllers' per-request limits by
//! [`read_registers`] and [`write_registers`].

pub mod connection;
pub mod constants;
pub mod frame;
pub mod pdu;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use connection::{TcpConnector, TcpTransport};
pub use constants::{base_address, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};
pub use transport::{chunk_ranges, read_registers, write_registers, Connector, RegisterTransport};

//! Modbus protocol constants
//!
//! Frame limits come from the Modbus application protocol: a PDU is at most
//! 253 bytes. The per-request register limits are the controller's, which
//! are tighter than the protocol maximums.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header bytes before the unit id:
/// Transaction ID(2) + Protocol ID(2) + Length(2)
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU size per Modbus specification
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Receive buffer: 6 + 254 bytes rounded up
pub const MODBUS_RESPONSE_BUFFER_SIZE: usize = 512;

// ============================================================================
// Function codes
// ============================================================================

pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Registers per FC03 request accepted by the controllers
pub const MAX_READ_REGISTERS: u16 = 123;

/// Registers per FC16 request accepted by the controllers
pub const MAX_WRITE_REGISTERS: u16 = 63;

/// Protocol ceiling for FC03: (253 - 2) / 2
pub const PROTOCOL_MAX_READ_REGISTERS: u16 = 125;

/// Protocol ceiling for FC16: (253 - 6) / 2
pub const PROTOCOL_MAX_WRITE_REGISTERS: u16 = 123;

/// Default TCP port
pub const DEFAULT_PORT: u16 = 502;

/// Holding-register addresses are configured in the 4xxxx notation
pub const HOLDING_REGISTER_BASE: u32 = 40000;

/// Total Modbus TCP frame size (MBAP header + unit id + PDU)
#[inline]
pub const fn mbap_frame_size(pdu_len: usize) -> usize {
    MBAP_HEADER_LEN + 1 + pdu_len
}

/// Protocol start address for a 4xxxx-style address, e.g. 40001 → 1
#[inline]
pub const fn base_address(address: u32) -> u16 {
    (address % HOLDING_REGISTER_BASE) as u16
}

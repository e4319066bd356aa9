//! Modbus PDU buffer and the two function codes the controllers speak
//!
//! The PDU lives in a fixed-size stack array; requests are built through
//! [`PduBuilder`] and responses are checked against the request that
//! produced them.

use errors::{protocol_error, ColdroomError, Result};
use tracing::debug;

use crate::constants::{
    FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS, MAX_PDU_SIZE,
    PROTOCOL_MAX_READ_REGISTERS, PROTOCOL_MAX_WRITE_REGISTERS,
};

/// PDU with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(protocol_error!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            ));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();

        if let Some(fc) = pdu.function_code() {
            if pdu.is_exception() {
                debug!(
                    "PDU parsed: FC={:02X} (Exception: {}), exception_code={:02X}",
                    fc,
                    function_code_description(fc),
                    pdu.exception_code().unwrap_or(0)
                );
            } else {
                debug!(
                    "PDU parsed: FC={:02X} ({}), data_len={}",
                    fc,
                    function_code_description(fc),
                    pdu.len - 1
                );
            }
        }

        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(protocol_error!("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<()> {
        let [hi, lo] = value.to_be_bytes();
        self.push(hi)?;
        self.push(lo)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        (self.len > 0).then(|| self.data[0])
    }

    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code().is_some_and(|fc| fc & 0x80 != 0)
    }

    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() && self.len > 1 {
            Some(self.data[1])
        } else {
            None
        }
    }

    /// Turn an exception response into the matching error
    pub fn check_exception(&self) -> Result<()> {
        match (self.is_exception(), self.function_code()) {
            (true, Some(fc)) => Err(ColdroomError::ModbusException {
                function: fc & 0x7F,
                code: self.exception_code().unwrap_or(0),
            }),
            _ => Ok(()),
        }
    }

    /// Register values of an FC03 response carrying `quantity` registers
    pub fn parse_read_response(&self, quantity: u16) -> Result<Vec<u16>> {
        self.check_exception()?;
        let data = self.as_slice();
        if data.first() != Some(&FC_READ_HOLDING_REGISTERS) {
            return Err(protocol_error!(
                "Unexpected function code in read response: {:?}",
                data.first()
            ));
        }
        let byte_count = data.get(1).copied().map(usize::from).unwrap_or(0);
        let expected = usize::from(quantity) * 2;
        if byte_count != expected || data.len() != 2 + expected {
            return Err(protocol_error!(
                "Read response size mismatch: byte count {}, payload {}, expected {}",
                byte_count,
                data.len().saturating_sub(2),
                expected
            ));
        }
        Ok(data[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Validate an FC16 echo of `address`/`quantity`
    pub fn parse_write_response(&self, address: u16, quantity: u16) -> Result<()> {
        self.check_exception()?;
        let data = self.as_slice();
        if data.len() != 5 || data[0] != FC_WRITE_MULTIPLE_REGISTERS {
            return Err(protocol_error!(
                "Malformed write response ({} bytes)",
                data.len()
            ));
        }
        let echoed_address = u16::from_be_bytes([data[1], data[2]]);
        let echoed_quantity = u16::from_be_bytes([data[3], data[4]]);
        if echoed_address != address || echoed_quantity != quantity {
            return Err(protocol_error!(
                "Write response echo mismatch: {}/{} vs {}/{}",
                echoed_address,
                echoed_quantity,
                address,
                quantity
            ));
        }
        Ok(())
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// Human-readable function code description
pub fn function_code_description(fc: u8) -> &'static str {
    match fc & 0x7F {
        0x03 => "Read Holding Registers",
        0x10 => "Write Multiple Registers",
        0x01 => "Read Coils",
        0x02 => "Read Discrete Inputs",
        0x04 => "Read Input Registers",
        0x05 => "Write Single Coil",
        0x06 => "Write Single Register",
        0x0F => "Write Multiple Coils",
        _ => "Unknown Function",
    }
}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> Result<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    #[inline]
    pub fn address(mut self, addr: u16) -> Result<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    #[inline]
    pub fn quantity(mut self, qty: u16) -> Result<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    #[inline]
    pub fn byte(mut self, b: u8) -> Result<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    /// Append registers big-endian
    pub fn registers(mut self, values: &[u16]) -> Result<Self> {
        for &value in values {
            self.pdu.push_u16(value)?;
        }
        Ok(self)
    }

    #[inline]
    pub fn build(self) -> ModbusPdu {
        self.pdu
    }

    /// FC03 request
    pub fn read_holding_registers(address: u16, quantity: u16) -> Result<ModbusPdu> {
        if quantity == 0 || quantity > PROTOCOL_MAX_READ_REGISTERS {
            return Err(protocol_error!("Invalid read quantity: {}", quantity));
        }
        Ok(Self::new()
            .function_code(FC_READ_HOLDING_REGISTERS)?
            .address(address)?
            .quantity(quantity)?
            .build())
    }

    /// FC16 request
    pub fn write_multiple_registers(address: u16, values: &[u16]) -> Result<ModbusPdu> {
        let quantity = u16::try_from(values.len())
            .ok()
            .filter(|q| (1..=PROTOCOL_MAX_WRITE_REGISTERS).contains(q))
            .ok_or_else(|| protocol_error!("Invalid write quantity: {}", values.len()))?;
        Ok(Self::new()
            .function_code(FC_WRITE_MULTIPLE_REGISTERS)?
            .address(address)?
            .quantity(quantity)?
            .byte((quantity * 2) as u8)?
            .registers(values)?
            .build())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_pdu_push_and_limits() {
        let mut pdu = ModbusPdu::new();
        assert!(pdu.is_empty());
        pdu.push_u16(0x1234).unwrap();
        assert_eq!(pdu.as_slice(), &[0x12, 0x34]);

        let mut full = ModbusPdu::from_slice(&[0u8; MAX_PDU_SIZE]).unwrap();
        assert!(full.push(1).is_err());
        assert!(ModbusPdu::from_slice(&[0u8; MAX_PDU_SIZE + 1]).is_err());
    }

    #[test]
    fn test_build_read_request() {
        let pdu = PduBuilder::read_holding_registers(1, 123).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x00, 0x01, 0x00, 0x7B]);
        assert!(PduBuilder::read_holding_registers(1, 0).is_err());
        assert!(PduBuilder::read_holding_registers(1, 126).is_err());
    }

    #[test]
    fn test_build_write_request() {
        let pdu = PduBuilder::write_multiple_registers(0x0105, &[0xFFFF, 0x0001]).unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x10, 0x01, 0x05, 0x00, 0x02, 0x04, 0xFF, 0xFF, 0x00, 0x01]
        );
        assert!(PduBuilder::write_multiple_registers(0, &[]).is_err());
    }

    #[test]
    fn test_parse_read_response() {
        let pdu = ModbusPdu::from_slice(&[0x03, 0x04, 0x00, 0x0A, 0xFF, 0xFE]).unwrap();
        assert_eq!(pdu.parse_read_response(2).unwrap(), vec![10, 0xFFFE]);
        assert!(pdu.parse_read_response(3).is_err());
    }

    #[test]
    fn test_parse_write_response() {
        let pdu = ModbusPdu::from_slice(&[0x10, 0x00, 0x10, 0x00, 0x02]).unwrap();
        assert!(pdu.parse_write_response(16, 2).is_ok());
        assert!(pdu.parse_write_response(16, 3).is_err());
    }

    #[test]
    fn test_exception_response() {
        let pdu = ModbusPdu::from_slice(&[0x83, 0x02]).unwrap();
        assert!(pdu.is_exception());
        assert_eq!(pdu.exception_code(), Some(0x02));
        match pdu.parse_read_response(1) {
            Err(ColdroomError::ModbusException { function, code }) => {
                assert_eq!(function, 0x03);
                assert_eq!(code, 0x02);
            },
            other => panic!("expected exception, got {other:?}"),
        }
    }
}

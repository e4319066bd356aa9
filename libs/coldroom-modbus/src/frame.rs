//! Modbus TCP framing (MBAP header)

use bytes::{BufMut, BytesMut};
use errors::{protocol_error, Result};
use tracing::debug;

use crate::constants::{mbap_frame_size, MAX_MBAP_LENGTH, MBAP_HEADER_LEN};
use crate::pdu::ModbusPdu;

/// Modbus TCP MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    /// Always 0 for Modbus
    pub protocol_id: u16,
    /// Unit id + PDU bytes
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Parse the 7 leading bytes of a frame
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MBAP_HEADER_LEN + 1 {
            return Err(protocol_error!("Frame too short: {} bytes", data.len()));
        }
        let header = Self {
            transaction_id: u16::from_be_bytes([data[0], data[1]]),
            protocol_id: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            unit_id: data[6],
        };
        if header.protocol_id != 0 {
            return Err(protocol_error!("Invalid protocol id: {}", header.protocol_id));
        }
        if header.length == 0 || usize::from(header.length) > MAX_MBAP_LENGTH {
            return Err(protocol_error!("Invalid MBAP length: {}", header.length));
        }
        Ok(header)
    }
}

/// Builds request frames and matches responses to them
#[derive(Debug)]
pub struct FrameProcessor {
    next_transaction_id: u16,
}

impl Default for FrameProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProcessor {
    pub fn new() -> Self {
        Self {
            next_transaction_id: 1,
        }
    }

    /// Next transaction id, wrapping from 0xFFFF to 0x0000
    pub fn next_transaction_id(&mut self) -> u16 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    /// Build a frame with a fresh transaction id
    pub fn build_frame(&mut self, unit_id: u8, pdu: &ModbusPdu) -> (u16, BytesMut) {
        let transaction_id = self.next_transaction_id();
        (transaction_id, build_tcp_frame(transaction_id, unit_id, pdu))
    }

    /// Validate a response frame against the request it answers
    pub fn parse_response(
        &self,
        data: &[u8],
        transaction_id: u16,
        unit_id: u8,
        function_code: u8,
    ) -> Result<ModbusPdu> {
        let header = MbapHeader::parse(data)?;
        let expected_len = MBAP_HEADER_LEN + usize::from(header.length);
        if data.len() != expected_len {
            return Err(protocol_error!(
                "Frame length mismatch: header says {}, got {}",
                expected_len,
                data.len()
            ));
        }
        if header.transaction_id != transaction_id {
            return Err(protocol_error!(
                "Transaction id mismatch: expected {}, got {}",
                transaction_id,
                header.transaction_id
            ));
        }
        if header.unit_id != unit_id {
            return Err(protocol_error!(
                "Unit id mismatch: expected {}, got {}",
                unit_id,
                header.unit_id
            ));
        }

        let pdu = ModbusPdu::from_slice(&data[MBAP_HEADER_LEN + 1..])?;
        match pdu.function_code() {
            Some(fc) if fc & 0x7F == function_code => Ok(pdu),
            other => Err(protocol_error!(
                "Function code mismatch: expected {:02X}, got {:?}",
                function_code,
                other
            )),
        }
    }
}

/// Encode header + unit + PDU
pub fn build_tcp_frame(transaction_id: u16, unit_id: u8, pdu: &ModbusPdu) -> BytesMut {
    let mut frame = BytesMut::with_capacity(mbap_frame_size(pdu.len()));
    frame.put_u16(transaction_id);
    frame.put_u16(0);
    frame.put_u16((pdu.len() + 1) as u16);
    frame.put_u8(unit_id);
    frame.put_slice(pdu.as_slice());
    debug!(
        "Built TCP frame: tid={}, unit={}, {} bytes",
        transaction_id,
        unit_id,
        frame.len()
    );
    frame
}

/// Description for a Modbus exception code
pub fn exception_description(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::pdu::PduBuilder;

    #[test]
    fn test_transaction_id_wraps() {
        let mut processor = FrameProcessor::new();
        assert_eq!(processor.next_transaction_id(), 1);
        processor.next_transaction_id = u16::MAX;
        assert_eq!(processor.next_transaction_id(), u16::MAX);
        assert_eq!(processor.next_transaction_id(), 0);
    }

    #[test]
    fn test_build_frame_layout() {
        let mut processor = FrameProcessor::new();
        let pdu = PduBuilder::read_holding_registers(1, 2).unwrap();
        let (tid, frame) = processor.build_frame(7, &pdu);
        assert_eq!(tid, 1);
        assert_eq!(
            &frame[..],
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x07, 0x03, 0x00, 0x01, 0x00, 0x02]
        );
    }

    #[test]
    fn test_parse_response_checks_identity() {
        let processor = FrameProcessor::new();
        let frame = [0x00, 0x05, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x12, 0x34];

        let pdu = processor.parse_response(&frame, 5, 1, 0x03).unwrap();
        assert_eq!(pdu.parse_read_response(1).unwrap(), vec![0x1234]);

        assert!(processor.parse_response(&frame, 6, 1, 0x03).is_err());
        assert!(processor.parse_response(&frame, 5, 2, 0x03).is_err());
        assert!(processor.parse_response(&frame, 5, 1, 0x10).is_err());
        assert!(processor.parse_response(&frame[..10], 5, 1, 0x03).is_err());
    }

    #[test]
    fn test_exception_frame_passes_function_check() {
        let processor = FrameProcessor::new();
        let frame = [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x90, 0x02];
        let pdu = processor.parse_response(&frame, 1, 1, 0x10).unwrap();
        assert_eq!(pdu.exception_code(), Some(0x02));
        assert_eq!(exception_description(0x02), "Illegal Data Address");
    }

    #[test]
    fn test_header_rejects_bad_protocol() {
        let frame = [0x00, 0x01, 0x00, 0x01, 0x00, 0x03, 0x01, 0x03, 0x00];
        assert!(MbapHeader::parse(&frame).is_err());
    }
}

//! Register transport abstraction and chunked block transfers

use async_trait::async_trait;
use errors::{ColdroomError, Result};
use tracing::trace;

use crate::constants::{MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};

/// Holding-register access to one device
#[async_trait]
pub trait RegisterTransport: Send {
    /// FC03 for at most one request's worth of registers
    async fn read_holding_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>>;

    /// FC16 for at most one request's worth of registers
    async fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> Result<()>;

    /// "host:port" for logs
    fn endpoint(&self) -> &str;
}

/// Opens transports; swapped for an in-memory one in tests
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16, unit_id: u8)
        -> Result<Box<dyn RegisterTransport>>;
}

/// Split `[start, start + count)` into request-sized ranges
pub fn chunk_ranges(start: u16, count: usize, max: u16) -> Vec<(u16, u16)> {
    let max = usize::from(max.max(1));
    (0..count)
        .step_by(max)
        .map(|offset| {
            let quantity = (count - offset).min(max);
            (start.wrapping_add(offset as u16), quantity as u16)
        })
        .collect()
}

/// Read `count` registers in chunks of at most [`MAX_READ_REGISTERS`]
pub async fn read_registers(
    transport: &mut dyn RegisterTransport,
    start: u16,
    count: usize,
) -> Result<Vec<u16>> {
    let mut registers = Vec::with_capacity(count);
    for (address, quantity) in chunk_ranges(start, count, MAX_READ_REGISTERS) {
        trace!("read chunk @{} x{}", address, quantity);
        let chunk = transport.read_holding_registers(address, quantity).await?;
        if chunk.len() != usize::from(quantity) {
            return Err(ColdroomError::Decode {
                expected: usize::from(quantity),
                actual: chunk.len(),
            });
        }
        registers.extend(chunk);
    }
    Ok(registers)
}

/// Write `values` in chunks of at most [`MAX_WRITE_REGISTERS`]
pub async fn write_registers(
    transport: &mut dyn RegisterTransport,
    start: u16,
    values: &[u16],
) -> Result<()> {
    for (address, quantity) in chunk_ranges(start, values.len(), MAX_WRITE_REGISTERS) {
        let offset = usize::from(address.wrapping_sub(start));
        trace!("write chunk @{} x{}", address, quantity);
        transport
            .write_multiple_registers(address, &values[offset..offset + usize::from(quantity)])
            .await?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingTransport {
        bank: Vec<u16>,
        reads: Vec<(u16, u16)>,
        writes: Vec<(u16, usize)>,
    }

    #[async_trait]
    impl RegisterTransport for CountingTransport {
        async fn read_holding_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>> {
            self.reads.push((address, quantity));
            let start = usize::from(address);
            Ok(self.bank[start..start + usize::from(quantity)].to_vec())
        }

        async fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> Result<()> {
            self.writes.push((address, values.len()));
            let start = usize::from(address);
            self.bank[start..start + values.len()].copy_from_slice(values);
            Ok(())
        }

        fn endpoint(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn test_chunk_ranges() {
        assert_eq!(chunk_ranges(1, 300, 123), vec![(1, 123), (124, 123), (247, 54)]);
        assert_eq!(chunk_ranges(0, 123, 123), vec![(0, 123)]);
        assert!(chunk_ranges(0, 0, 123).is_empty());
    }

    #[tokio::test]
    async fn test_read_300_registers_takes_three_requests() {
        let mut transport = CountingTransport {
            bank: (0..400).collect(),
            ..Default::default()
        };
        let values = read_registers(&mut transport, 1, 300).await.unwrap();
        assert_eq!(values.len(), 300);
        assert_eq!(values[0], 1);
        assert_eq!(values[299], 300);
        assert_eq!(transport.reads.len(), 3);
        assert!(transport.reads.iter().all(|(_, q)| *q <= MAX_READ_REGISTERS));
    }

    #[tokio::test]
    async fn test_write_130_registers_takes_three_requests() {
        let mut transport = CountingTransport {
            bank: vec![0; 200],
            ..Default::default()
        };
        let values: Vec<u16> = (1..=130).collect();
        write_registers(&mut transport, 10, &values).await.unwrap();
        assert_eq!(transport.writes, vec![(10, 63), (73, 63), (136, 4)]);
        assert_eq!(&transport.bank[10..140], values.as_slice());
    }
}

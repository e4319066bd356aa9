//! Register codec
//!
//! Big-endian throughout: 32-bit values put the high word first, and bit `k`
//! of a bitfield register is `1 << k`.

use crate::field::{FieldType, Value};
use crate::schema::MemoryMapSchema;
use crate::snapshot::DeviceSnapshot;
use errors::{ColdroomError, Result};
use std::sync::Arc;

/// Encodes and decodes whole snapshots for one schema
#[derive(Debug, Clone)]
pub struct Codec {
    schema: Arc<MemoryMapSchema>,
}

impl Codec {
    pub fn new(schema: Arc<MemoryMapSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Arc<MemoryMapSchema> {
        &self.schema
    }

    pub fn encode(&self, snapshot: &DeviceSnapshot) -> Vec<u16> {
        let mut registers = vec![0u16; usize::from(self.schema.total_registers())];
        for (field, value) in self.schema.fields().iter().zip(snapshot.values()) {
            let offset = usize::from(field.offset);
            match (field.bit, value) {
                (Some(bit), Value::Bool(on)) => {
                    registers[offset] = with_bit(registers[offset], bit, *on);
                },
                _ => {
                    let words = encode_value(*value);
                    registers[offset..offset + words.len()].copy_from_slice(&words);
                },
            }
        }
        registers
    }

    pub fn decode(&self, registers: &[u16]) -> Result<DeviceSnapshot> {
        let mut snapshot = DeviceSnapshot::new(self.schema.clone());
        self.decode_into(&mut snapshot, registers)?;
        Ok(snapshot)
    }

    /// Decode into an existing snapshot; on error it is left untouched
    pub fn decode_into(&self, snapshot: &mut DeviceSnapshot, registers: &[u16]) -> Result<()> {
        let expected = usize::from(self.schema.total_registers());
        if registers.len() != expected {
            return Err(ColdroomError::Decode {
                expected,
                actual: registers.len(),
            });
        }

        let fields = self.schema.fields();
        for (field, slot) in fields.iter().zip(snapshot.values_mut()) {
            let offset = usize::from(field.offset);
            *slot = match field.bit {
                Some(bit) => Value::Bool(registers[offset] & (1 << bit) != 0),
                None => {
                    let end = offset + usize::from(field.size);
                    decode_value(field.field_type, &registers[offset..end])
                },
            };
        }
        snapshot.refresh_computed();
        Ok(())
    }
}

/// Words for a scalar value. A bool becomes a single `0`/`1` register.
pub fn encode_value(value: Value) -> Vec<u16> {
    match value {
        Value::Bool(b) => vec![u16::from(b)],
        Value::U16(v) => vec![v],
        Value::I16(v) => vec![v as u16],
        Value::U32(v) => split_u32(v).to_vec(),
        Value::I32(v) => split_u32(v as u32).to_vec(),
        Value::F32(v) => split_u32(v.to_bits()).to_vec(),
    }
}

/// Inverse of [`encode_value`]; missing words read as zero
pub fn decode_value(field_type: FieldType, words: &[u16]) -> Value {
    let word = |i: usize| words.get(i).copied().unwrap_or(0);
    let joined = || (u32::from(word(0)) << 16) | u32::from(word(1));
    match field_type {
        FieldType::Bool => Value::Bool(word(0) != 0),
        FieldType::U16 => Value::U16(word(0)),
        FieldType::I16 => Value::I16(word(0) as i16),
        FieldType::U32 => Value::U32(joined()),
        FieldType::I32 => Value::I32(joined() as i32),
        FieldType::F32 => Value::F32(f32::from_bits(joined())),
    }
}

/// `register` with only `bit` changed
pub fn with_bit(register: u16, bit: u8, on: bool) -> u16 {
    let mask = 1u16 << bit;
    if on {
        register | mask
    } else {
        register & !mask
    }
}

fn split_u32(v: u32) -> [u16; 2] {
    [(v >> 16) as u16, v as u16]
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use rand::Rng;

    fn codec() -> Codec {
        Codec::new(MemoryMapSchema::bundled().unwrap())
    }

    #[test]
    fn test_word_order() {
        assert_eq!(encode_value(Value::U32(0x1234_5678)), vec![0x1234, 0x5678]);
        assert_eq!(encode_value(Value::I32(-2)), vec![0xFFFF, 0xFFFE]);
        assert_eq!(encode_value(Value::F32(1.0)), vec![0x3F80, 0x0000]);
        assert_eq!(encode_value(Value::I16(-1)), vec![0xFFFF]);
        assert_eq!(
            decode_value(FieldType::F32, &[0xC0A0, 0x0000]),
            Value::F32(-5.0)
        );
    }

    #[test]
    fn test_with_bit() {
        assert_eq!(with_bit(0b1111_1111_1111_0111, 3, true), 0xFFFF);
        assert_eq!(with_bit(0xFFFF, 0, false), 0xFFFE);
        assert_eq!(with_bit(0, 15, true), 0x8000);
    }

    #[test]
    fn test_decode_length_mismatch() {
        let codec = codec();
        let short = vec![0u16; 380];
        assert!(matches!(
            codec.decode(&short),
            Err(ColdroomError::Decode {
                expected: 381,
                actual: 380
            })
        ));
        let long = vec![0u16; 382];
        assert!(codec.decode(&long).is_err());
    }

    #[test]
    fn test_failed_decode_leaves_snapshot() {
        let codec = codec();
        let mut regs = vec![0u16; 381];
        regs[0] = 1;
        let mut snap = codec.decode(&regs).unwrap();
        assert!(codec.decode_into(&mut snap, &regs[..10]).is_err());
        assert!(snap.get_bool("onOffSystem").unwrap());
    }

    #[test]
    fn test_random_registers_round_trip() {
        let codec = codec();
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let regs: Vec<u16> = (0..codec.schema().total_registers())
                .map(|_| rng.gen())
                .collect();
            let snapshot = codec.decode(&regs).unwrap();
            assert_eq!(codec.encode(&snapshot), regs);
        }
    }

    #[test]
    fn test_non_finite_floats_round_trip() {
        let codec = codec();
        let mut snap = DeviceSnapshot::new(codec.schema().clone());
        let payload_nan = f32::from_bits(0x7FC0_1234);
        snap.set("temperatureInside", Value::F32(payload_nan)).unwrap();
        snap.set("humidityInside", Value::F32(f32::INFINITY)).unwrap();
        snap.set("CO2Measure", Value::F32(f32::NEG_INFINITY)).unwrap();
        snap.set("C2H4GasConcentration", Value::U32(0xDEAD_BEEF)).unwrap();
        snap.set("pidCold.dCoefficient", Value::I16(-32768)).unwrap();

        let back = codec.decode(&codec.encode(&snap)).unwrap();
        assert_eq!(back, snap);
        match back.get("temperatureInside").unwrap() {
            Value::F32(v) => assert_eq!(v.to_bits(), 0x7FC0_1234),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bit_positions_in_registers() {
        let codec = codec();
        let mut snap = DeviceSnapshot::new(codec.schema().clone());
        snap.set("workingMode", Value::Bool(true)).unwrap();
        let regs = codec.encode(&snap);
        let field = codec.schema().get_field("workingMode").unwrap();
        assert_eq!(regs[usize::from(field.offset)], 1 << field.bit.unwrap());
    }
}

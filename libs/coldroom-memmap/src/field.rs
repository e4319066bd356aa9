//! Field descriptors and typed values

use crate::tags::{Tag, TagSet};
use errors::{ColdroomError, Result};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Wire type of a leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    U16,
    I16,
    U32,
    I32,
    F32,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::U16 => "u16",
            FieldType::I16 => "i16",
            FieldType::U32 => "u32",
            FieldType::I32 => "i32",
            FieldType::F32 => "f32",
        }
    }

    /// Size in bytes of a scalar; bools occupy a single bit
    pub fn byte_size(self) -> usize {
        match self {
            FieldType::Bool => 0,
            FieldType::U16 | FieldType::I16 => 2,
            FieldType::U32 | FieldType::I32 | FieldType::F32 => 4,
        }
    }

    /// Registers taken by a scalar, `ceil(bytes / 2)`
    pub fn register_count(self) -> u16 {
        self.byte_size().div_ceil(2) as u16
    }

    /// Marker written to `eepromTypeToSave` when persisting a field of this type
    pub fn eeprom_marker(self) -> u16 {
        match self {
            FieldType::Bool | FieldType::U16 | FieldType::I16 => 1,
            FieldType::U32 | FieldType::I32 | FieldType::F32 => 2,
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, FieldType::Bool)
    }

    pub fn default_value(self) -> Value {
        match self {
            FieldType::Bool => Value::Bool(false),
            FieldType::U16 => Value::U16(0),
            FieldType::I16 => Value::I16(0),
            FieldType::U32 => Value::U32(0),
            FieldType::I32 => Value::I32(0),
            FieldType::F32 => Value::F32(0.0),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a value change must be followed by an EEPROM save request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    Volatile,
    EepromBacked,
}

/// A register-backed leaf of the memory map.
///
/// Built once by the schema loader and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct FieldDescriptor {
    /// Dotted path, e.g. `pidHumidity.pCoefficient`
    pub path: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub tags: TagSet,
    pub persistence: Persistence,
    /// Register offset from the device base address
    pub offset: u16,
    /// Bit inside the register, bools only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit: Option<u8>,
    /// Registers covered (1 for bools)
    pub size: u16,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl FieldDescriptor {
    pub fn is_eeprom(&self) -> bool {
        self.persistence == Persistence::EepromBacked
    }

    pub fn has_tag(&self, tag: Tag) -> bool {
        self.tags.contains(tag)
    }

    /// Hidden from dictionaries and exports
    pub fn is_hidden(&self) -> bool {
        self.path.starts_with('_')
    }

    /// `HR{offset}` or `HR{offset}.{bit}`
    pub fn address(&self) -> String {
        match self.bit {
            Some(bit) => format!("HR{}.{}", self.offset, bit),
            None => format!("HR{}", self.offset),
        }
    }
}

/// A decoded leaf value.
///
/// Equality is bit-exact for floats so NaN payloads compare equal to
/// themselves and change detection stays quiet on an unchanged NaN.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    Bool(bool),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::U16(a), Value::U16(b)) => a == b,
            (Value::I16(a), Value::I16(b)) => a == b,
            (Value::U32(a), Value::U32(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Value {
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Bool(_) => FieldType::Bool,
            Value::U16(_) => FieldType::U16,
            Value::I16(_) => FieldType::I16,
            Value::U32(_) => FieldType::U32,
            Value::I32(_) => FieldType::I32,
            Value::F32(_) => FieldType::F32,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view for history rows; `None` for bools
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(_) => None,
            Value::U16(v) => Some(f64::from(*v)),
            Value::I16(v) => Some(f64::from(*v)),
            Value::U32(v) => Some(f64::from(*v)),
            Value::I32(v) => Some(f64::from(*v)),
            Value::F32(v) => Some(f64::from(*v)),
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Value::F32(v) => v.is_finite(),
            _ => true,
        }
    }

    /// JSON view. With `sanitize`, non-finite floats become `null`.
    pub fn to_json(&self, sanitize: bool) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::U16(v) => (*v).into(),
            Value::I16(v) => (*v).into(),
            Value::U32(v) => (*v).into(),
            Value::I32(v) => (*v).into(),
            Value::F32(v) => {
                if sanitize && !v.is_finite() {
                    serde_json::Value::Null
                } else {
                    serde_json::Number::from_f64(f64::from(*v))
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            },
        }
    }

    /// Coerce an untyped JSON input into a value of `field_type`.
    ///
    /// Bools accept `true/false` and `0/1`; integers must be whole and in
    /// range; floats accept any number representable as a finite f32.
    pub fn from_json(field_type: FieldType, input: &serde_json::Value) -> Result<Value> {
        let mismatch = || ColdroomError::TypeMismatch {
            expected: field_type.to_string(),
            actual: json_kind(input).to_string(),
        };

        if field_type == FieldType::Bool {
            return match input {
                serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
                serde_json::Value::Number(n) => match n.as_u64() {
                    Some(0) => Ok(Value::Bool(false)),
                    Some(1) => Ok(Value::Bool(true)),
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            };
        }

        let number = match input {
            serde_json::Value::Number(n) => n,
            _ => return Err(mismatch()),
        };

        if field_type == FieldType::F32 {
            let v = number.as_f64().ok_or_else(mismatch)?;
            let narrowed = v as f32;
            if !narrowed.is_finite() {
                return Err(ColdroomError::OutOfRange {
                    value: v.to_string(),
                    min: f32::MIN.to_string(),
                    max: f32::MAX.to_string(),
                });
            }
            return Ok(Value::F32(narrowed));
        }

        let whole = match (number.as_i64(), number.as_f64()) {
            (Some(i), _) => i,
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => f as i64,
            _ => return Err(mismatch()),
        };

        let out_of_range = || {
            let (min, max) = integer_range(field_type);
            ColdroomError::OutOfRange {
                value: whole.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            }
        };
        match field_type {
            FieldType::U16 => u16::try_from(whole).map(Value::U16).map_err(|_| out_of_range()),
            FieldType::I16 => i16::try_from(whole).map(Value::I16).map_err(|_| out_of_range()),
            FieldType::U32 => u32::try_from(whole).map(Value::U32).map_err(|_| out_of_range()),
            FieldType::I32 => i32::try_from(whole).map(Value::I32).map_err(|_| out_of_range()),
            FieldType::Bool | FieldType::F32 => Err(mismatch()),
        }
    }
}

fn integer_range(field_type: FieldType) -> (i64, i64) {
    match field_type {
        FieldType::U16 => (0, i64::from(u16::MAX)),
        FieldType::I16 => (i64::from(i16::MIN), i64::from(i16::MAX)),
        FieldType::U32 => (0, i64::from(u32::MAX)),
        FieldType::I32 => (i64::from(i32::MIN), i64::from(i32::MAX)),
        FieldType::Bool | FieldType::F32 => (0, 0),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl Serialize for Value {
    /// Non-finite floats serialize as `null`
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::U16(v) => serializer.serialize_u16(*v),
            Value::I16(v) => serializer.serialize_i16(*v),
            Value::U32(v) => serializer.serialize_u32(*v),
            Value::I32(v) => serializer.serialize_i32(*v),
            Value::F32(v) if v.is_finite() => serializer.serialize_f32(*v),
            Value::F32(_) => serializer.serialize_none(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::U16(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_counts() {
        assert_eq!(FieldType::U16.register_count(), 1);
        assert_eq!(FieldType::I16.register_count(), 1);
        assert_eq!(FieldType::U32.register_count(), 2);
        assert_eq!(FieldType::F32.register_count(), 2);
    }

    #[test]
    fn test_eeprom_markers() {
        assert_eq!(FieldType::Bool.eeprom_marker(), 1);
        assert_eq!(FieldType::I16.eeprom_marker(), 1);
        assert_eq!(FieldType::F32.eeprom_marker(), 2);
        assert_eq!(FieldType::U32.eeprom_marker(), 2);
    }

    #[test]
    fn test_nan_equality_is_bitwise() {
        let a = Value::F32(f32::NAN);
        assert_eq!(a, a);
        assert_ne!(Value::F32(0.0), Value::F32(-0.0));
        assert_ne!(Value::U16(1), Value::I16(1));
    }

    #[test]
    fn test_sanitized_json() {
        assert_eq!(Value::F32(f32::INFINITY).to_json(true), json!(null));
        assert_eq!(Value::F32(1.5).to_json(true), json!(1.5));
        assert_eq!(serde_json::to_value(Value::F32(f32::NAN)).unwrap(), json!(null));
        assert_eq!(serde_json::to_value(Value::I16(-4)).unwrap(), json!(-4));
    }

    #[test]
    fn test_coercion() {
        assert_eq!(
            Value::from_json(FieldType::Bool, &json!(true)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Value::from_json(FieldType::Bool, &json!(0)).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            Value::from_json(FieldType::I16, &json!(-300)).unwrap(),
            Value::I16(-300)
        );
        assert_eq!(
            Value::from_json(FieldType::U16, &json!(12.0)).unwrap(),
            Value::U16(12)
        );
        assert_eq!(
            Value::from_json(FieldType::F32, &json!(3)).unwrap(),
            Value::F32(3.0)
        );
    }

    #[test]
    fn test_coercion_errors() {
        assert!(matches!(
            Value::from_json(FieldType::U16, &json!(70000)),
            Err(ColdroomError::OutOfRange { .. })
        ));
        assert!(matches!(
            Value::from_json(FieldType::U16, &json!(-1)),
            Err(ColdroomError::OutOfRange { .. })
        ));
        assert!(matches!(
            Value::from_json(FieldType::I16, &json!(1.5)),
            Err(ColdroomError::TypeMismatch { .. })
        ));
        assert!(matches!(
            Value::from_json(FieldType::Bool, &json!("yes")),
            Err(ColdroomError::TypeMismatch { .. })
        ));
        assert!(matches!(
            Value::from_json(FieldType::F32, &json!(null)),
            Err(ColdroomError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_f32_coercion_rejects_overflow() {
        assert!(matches!(
            Value::from_json(FieldType::F32, &json!(1e300)),
            Err(ColdroomError::OutOfRange { .. })
        ));
        assert!(matches!(
            Value::from_json(FieldType::F32, &json!(-1e39)),
            Err(ColdroomError::OutOfRange { .. })
        ));
        assert_eq!(
            Value::from_json(FieldType::F32, &json!(3.0e38)).unwrap(),
            Value::F32(3.0e38)
        );
    }

    #[test]
    fn test_address() {
        let mut field = FieldDescriptor {
            path: "onOffSystem".into(),
            field_type: FieldType::Bool,
            tags: TagSet::empty().with(Tag::Param),
            persistence: Persistence::EepromBacked,
            offset: 0,
            bit: Some(0),
            size: 1,
            description: String::new(),
            units: None,
            max: None,
        };
        assert_eq!(field.address(), "HR0.0");
        field.bit = None;
        field.offset = 260;
        assert_eq!(field.address(), "HR260");
    }
}

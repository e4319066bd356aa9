//! Typed, path-addressable view of one device's memory map

use crate::field::{FieldDescriptor, Value};
use crate::schema::{FieldRef, MemoryMapSchema};
use errors::{ColdroomError, Result};
use std::sync::Arc;

/// One value per register-backed leaf plus the derived values.
///
/// Replaced as a whole after every successful decode, so readers never see a
/// half-updated map.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    schema: Arc<MemoryMapSchema>,
    values: Vec<Value>,
    computed: Vec<Value>,
}

impl PartialEq for DeviceSnapshot {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.schema, &other.schema)
            && self.values == other.values
            && self.computed == other.computed
    }
}

impl DeviceSnapshot {
    /// All fields at their zero value
    pub fn new(schema: Arc<MemoryMapSchema>) -> Self {
        let values = schema
            .fields()
            .iter()
            .map(|f| f.field_type.default_value())
            .collect();
        let computed = schema
            .computed_fields()
            .iter()
            .map(|c| c.field_type.default_value())
            .collect();
        let mut snapshot = Self {
            schema,
            values,
            computed,
        };
        snapshot.refresh_computed();
        snapshot
    }

    pub fn schema(&self) -> &Arc<MemoryMapSchema> {
        &self.schema
    }

    /// Register-backed values in schema order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value_at(&self, index: usize) -> Option<Value> {
        self.values.get(index).copied()
    }

    pub(crate) fn values_mut(&mut self) -> &mut [Value] {
        &mut self.values
    }

    pub fn get(&self, path: &str) -> Result<Value> {
        match self.schema.resolve(path)? {
            FieldRef::Register(i) => Ok(self.values[i]),
            FieldRef::Computed(i) => Ok(self.computed[i]),
        }
    }

    pub fn get_bool(&self, path: &str) -> Result<bool> {
        let value = self.get(path)?;
        value.as_bool().ok_or_else(|| ColdroomError::TypeMismatch {
            expected: "bool".to_string(),
            actual: value.field_type().to_string(),
        })
    }

    /// Set a register-backed leaf. The value type must match the field.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        let index = match self.schema.resolve(path)? {
            FieldRef::Register(i) => i,
            FieldRef::Computed(_) => {
                return Err(ColdroomError::BadRequest(format!(
                    "{} is computed and read-only",
                    path
                )))
            },
        };
        let expected = self.schema.fields()[index].field_type;
        if value.field_type() != expected {
            return Err(ColdroomError::TypeMismatch {
                expected: expected.to_string(),
                actual: value.field_type().to_string(),
            });
        }
        self.values[index] = value;
        self.refresh_computed();
        Ok(())
    }

    /// Re-derive computed fields from the register values
    pub fn refresh_computed(&mut self) {
        for (slot, field) in self
            .computed
            .iter_mut()
            .zip(self.schema.computed_fields())
        {
            *slot = field.evaluate(&self.values);
        }
    }

    /// Leaves whose value differs from `previous`, with (old, new)
    pub fn changes_since<'a>(
        &'a self,
        previous: &'a DeviceSnapshot,
    ) -> impl Iterator<Item = (&'a FieldDescriptor, Value, Value)> + 'a {
        self.schema
            .fields()
            .iter()
            .zip(previous.values.iter().zip(self.values.iter()))
            .filter(|(_, (old, new))| old != new)
            .map(|(field, (old, new))| (field, *old, *new))
    }

    /// Path → value map of every visible field.
    ///
    /// Paths starting with `_` are omitted. With `sanitize`, NaN and
    /// infinities become `null`.
    pub fn to_json_map(&self, sanitize: bool) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::with_capacity(self.values.len() + self.computed.len());
        for (field, value) in self.schema.fields().iter().zip(&self.values) {
            if !field.is_hidden() {
                map.insert(field.path.clone(), value.to_json(sanitize));
            }
        }
        for (field, value) in self.schema.computed_fields().iter().zip(&self.computed) {
            map.insert(field.path.clone(), value.to_json(sanitize));
        }
        map
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::field::FieldType;

    fn schema() -> Arc<MemoryMapSchema> {
        MemoryMapSchema::bundled().unwrap()
    }

    #[test]
    fn test_defaults_and_computed() {
        let snap = DeviceSnapshot::new(schema());
        assert_eq!(snap.get("onOffSystem").unwrap(), Value::Bool(false));
        assert!(snap.get_bool("systemOff").unwrap());
        assert!(!snap.get_bool("systemOn").unwrap());
        assert!(!snap.get_bool("anyAlarm").unwrap());
    }

    #[test]
    fn test_set_updates_computed() {
        let mut snap = DeviceSnapshot::new(schema());
        snap.set("photocell2", Value::Bool(true)).unwrap();
        assert!(snap.get_bool("openDoor").unwrap());
        snap.set("temperatureInside", Value::F32(-1.5)).unwrap();
        assert_eq!(snap.get("temperature").unwrap(), Value::F32(-1.5));
        snap.set("highTemperatureAlarm", Value::Bool(true)).unwrap();
        assert!(snap.get_bool("anyAlarm").unwrap());
    }

    #[test]
    fn test_set_errors() {
        let mut snap = DeviceSnapshot::new(schema());
        assert!(matches!(
            snap.set("nope", Value::Bool(true)),
            Err(ColdroomError::FieldNotFound(_))
        ));
        assert!(matches!(
            snap.set("onOffSystem", Value::U16(1)),
            Err(ColdroomError::TypeMismatch { .. })
        ));
        assert!(matches!(
            snap.set("anyAlarm", Value::Bool(true)),
            Err(ColdroomError::BadRequest(_))
        ));
    }

    #[test]
    fn test_json_map_hides_reserved_and_sanitizes() {
        let mut snap = DeviceSnapshot::new(schema());
        snap.set("humidityInside", Value::F32(f32::NAN)).unwrap();
        let map = snap.to_json_map(true);
        assert!(map.keys().all(|k| !k.starts_with('_')));
        assert_eq!(map["humidityInside"], serde_json::Value::Null);
        assert_eq!(map["humidity"], serde_json::Value::Null);
        assert!(map.contains_key("pidHumidity.pCoefficient"));

        // The snapshot itself keeps the NaN
        assert!(matches!(snap.get("humidityInside").unwrap(), Value::F32(v) if v.is_nan()));
    }

    #[test]
    fn test_changes_since() {
        let schema = schema();
        let before = DeviceSnapshot::new(schema.clone());
        let mut after = before.clone();
        after.set("lowRefCO2", Value::U16(800)).unwrap();
        let changes: Vec<_> = after.changes_since(&before).collect();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0.path, "lowRefCO2");
        assert_eq!(changes[0].0.field_type, FieldType::U16);
        assert_eq!(changes[0].2, Value::U16(800));
    }
}

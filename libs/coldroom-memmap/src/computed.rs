//! Fields derived from decoded registers

use crate::field::{FieldType, Value};
use crate::tags::TagSet;
use serde::Serialize;

/// Derivation rule; indices point into the schema's register fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputedRule {
    Copy(usize),
    Not(usize),
    AnyOf(Vec<usize>),
    AnyTagged(Vec<usize>),
}

#[derive(Debug, Clone, Serialize)]
pub struct ComputedField {
    pub path: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub tags: TagSet,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(skip)]
    pub rule: ComputedRule,
}

impl ComputedField {
    pub fn evaluate(&self, values: &[Value]) -> Value {
        let truthy = |i: &usize| values.get(*i).and_then(Value::as_bool).unwrap_or(false);
        match &self.rule {
            ComputedRule::Copy(i) => values
                .get(*i)
                .copied()
                .unwrap_or_else(|| self.field_type.default_value()),
            ComputedRule::Not(i) => Value::Bool(!truthy(i)),
            ComputedRule::AnyOf(sources) | ComputedRule::AnyTagged(sources) => {
                Value::Bool(sources.iter().any(truthy))
            },
        }
    }
}

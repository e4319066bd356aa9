//! Memory map declaration, loading and register allocation

use crate::computed::{ComputedField, ComputedRule};
use crate::field::{FieldDescriptor, FieldType, Persistence};
use crate::tags::{Tag, TagSet};
use errors::{ColdroomError, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Firmware map shipped with the crate
pub const BUNDLED_MAP: &str = include_str!("../assets/memory_map.yaml");

const MAX_STRUCT_DEPTH: usize = 8;

// ============================================================================
// Declaration (map file) types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MapFile {
    #[serde(default)]
    structs: HashMap<String, StructDecl>,
    blocks: Vec<BlockDecl>,
    #[serde(default)]
    computed: Vec<ComputedDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StructDecl {
    fields: Vec<LeafDecl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// Sixteen packed booleans
    Bitfield,
    Struct,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BlockDecl {
    name: String,
    kind: BlockKind,
    fields: Vec<LeafDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LeafDecl {
    name: String,
    #[serde(rename = "type")]
    field_type: Option<FieldType>,
    #[serde(rename = "struct")]
    struct_ref: Option<String>,
    #[serde(default)]
    eeprom: bool,
    #[serde(default)]
    tags: Vec<Tag>,
    units: Option<String>,
    max: Option<f64>,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RuleDecl {
    Copy,
    Not,
    AnyOf,
    AnyTagged,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ComputedDecl {
    name: String,
    #[serde(rename = "type")]
    field_type: FieldType,
    rule: RuleDecl,
    #[serde(default)]
    source: Vec<String>,
    tag: Option<Tag>,
    units: Option<String>,
    #[serde(default)]
    description: String,
}

// ============================================================================
// Schema
// ============================================================================

/// Where a path resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRef {
    Register(usize),
    Computed(usize),
}

/// Register span of a declared block
#[derive(Debug, Clone, serde::Serialize)]
pub struct BlockInfo {
    pub name: String,
    pub kind: BlockKind,
    /// First register
    pub start: u16,
    /// One past the last register
    pub end: u16,
}

/// The controller's register space: ordered leaves with computed offsets.
#[derive(Debug)]
pub struct MemoryMapSchema {
    fields: Vec<FieldDescriptor>,
    computed: Vec<ComputedField>,
    index: HashMap<String, FieldRef>,
    blocks: Vec<BlockInfo>,
    total_registers: u16,
}

/// Walk state: current register and the next free bit of an open run
#[derive(Debug, Default)]
struct Cursor {
    offset: u32,
    bit: u8,
}

impl Cursor {
    fn take_bit(&mut self) -> (u32, u8) {
        let slot = (self.offset, self.bit);
        self.bit += 1;
        if self.bit == 16 {
            self.offset += 1;
            self.bit = 0;
        }
        slot
    }

    fn flush_bits(&mut self) {
        if self.bit > 0 {
            self.offset += 1;
            self.bit = 0;
        }
    }

    fn take_registers(&mut self, count: u16) -> u32 {
        self.flush_bits();
        let start = self.offset;
        self.offset += u32::from(count);
        start
    }

    /// Registers used, counting a partially filled bit run
    fn length(&self) -> u32 {
        self.offset + u32::from(self.bit > 0)
    }
}

struct Allocator<'a> {
    structs: &'a HashMap<String, StructDecl>,
    cursor: Cursor,
    fields: Vec<FieldDescriptor>,
}

impl<'a> Allocator<'a> {
    fn walk(
        &mut self,
        decls: &[LeafDecl],
        prefix: Option<&str>,
        inherited: TagSet,
        inherited_units: Option<&str>,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_STRUCT_DEPTH {
            return Err(ColdroomError::SchemaLoad(format!(
                "struct nesting deeper than {} at {}",
                MAX_STRUCT_DEPTH,
                prefix.unwrap_or("<root>")
            )));
        }

        for decl in decls {
            let path = match prefix {
                Some(p) => format!("{}.{}", p, decl.name),
                None => decl.name.clone(),
            };
            let tags = inherited.union(decl.tags.iter().copied().collect());
            let units = decl.units.as_deref().or(inherited_units);

            match (&decl.struct_ref, decl.field_type) {
                (Some(name), None) => {
                    let nested = self.structs.get(name).ok_or_else(|| {
                        ColdroomError::SchemaLoad(format!("{}: unknown struct '{}'", path, name))
                    })?;
                    self.walk(&nested.fields, Some(&path), tags, units, depth + 1)?;
                },
                (None, Some(field_type)) => self.push_leaf(decl, path, field_type, tags, units)?,
                _ => {
                    return Err(ColdroomError::SchemaLoad(format!(
                        "{}: exactly one of 'type' or 'struct' is required",
                        path
                    )))
                },
            }
        }
        Ok(())
    }

    fn push_leaf(
        &mut self,
        decl: &LeafDecl,
        path: String,
        field_type: FieldType,
        mut tags: TagSet,
        units: Option<&str>,
    ) -> Result<()> {
        let (offset, bit, size) = if field_type == FieldType::Bool {
            let (offset, bit) = self.cursor.take_bit();
            (offset, Some(bit), 1)
        } else {
            let size = field_type.register_count();
            (self.cursor.take_registers(size), None, size)
        };

        let offset = u16::try_from(offset).map_err(|_| {
            ColdroomError::SchemaLoad(format!("{}: offset {} exceeds register space", path, offset))
        })?;

        if tags.is_empty() {
            tags.insert(Tag::IoData);
        }

        self.fields.push(FieldDescriptor {
            path,
            field_type,
            tags,
            persistence: if decl.eeprom {
                Persistence::EepromBacked
            } else {
                Persistence::Volatile
            },
            offset,
            bit,
            size,
            description: decl.description.trim().to_string(),
            units: units.map(str::to_string),
            max: decl.max,
        });
        Ok(())
    }
}

impl MemoryMapSchema {
    /// Load the firmware map bundled with the crate
    pub fn bundled() -> Result<Arc<Self>> {
        Self::from_yaml(BUNDLED_MAP).map(Arc::new)
    }

    /// Parse and allocate a map declaration
    pub fn from_yaml(source: &str) -> Result<Self> {
        let file: MapFile = serde_yaml::from_str(source)?;

        let mut alloc = Allocator {
            structs: &file.structs,
            cursor: Cursor::default(),
            fields: Vec::new(),
        };
        let mut blocks = Vec::with_capacity(file.blocks.len());

        for block in &file.blocks {
            if block.kind == BlockKind::Bitfield {
                if let Some(bad) = block
                    .fields
                    .iter()
                    .find(|f| f.field_type != Some(FieldType::Bool))
                {
                    return Err(ColdroomError::SchemaLoad(format!(
                        "{}: bitfield block holds non-bool field '{}'",
                        block.name, bad.name
                    )));
                }
            }
            let start = alloc.cursor.offset;
            alloc.walk(&block.fields, None, TagSet::empty(), None, 0)?;
            blocks.push(BlockInfo {
                name: block.name.clone(),
                kind: block.kind,
                start: start as u16,
                end: alloc.cursor.length() as u16,
            });
        }

        let total = alloc.cursor.length();
        let total_registers = u16::try_from(total)
            .map_err(|_| ColdroomError::SchemaLoad(format!("map too long: {} registers", total)))?;
        let fields = alloc.fields;

        let mut index = HashMap::with_capacity(fields.len() + file.computed.len());
        let mut slots = HashSet::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if index
                .insert(field.path.clone(), FieldRef::Register(i))
                .is_some()
            {
                return Err(ColdroomError::SchemaLoad(format!(
                    "duplicate path '{}'",
                    field.path
                )));
            }
            if !slots.insert((field.offset, field.bit)) {
                return Err(ColdroomError::SchemaLoad(format!(
                    "{} overlaps another field at {}",
                    field.path,
                    field.address()
                )));
            }
        }

        let mut computed = Vec::with_capacity(file.computed.len());
        for decl in &file.computed {
            let field = Self::build_computed(decl, &fields, &index)?;
            if index
                .insert(field.path.clone(), FieldRef::Computed(computed.len()))
                .is_some()
            {
                return Err(ColdroomError::SchemaLoad(format!(
                    "duplicate path '{}'",
                    field.path
                )));
            }
            computed.push(field);
        }

        debug!(
            "Memory map: {} fields, {} computed, {} registers",
            fields.len(),
            computed.len(),
            total_registers
        );

        Ok(Self {
            fields,
            computed,
            index,
            blocks,
            total_registers,
        })
    }

    fn build_computed(
        decl: &ComputedDecl,
        fields: &[FieldDescriptor],
        index: &HashMap<String, FieldRef>,
    ) -> Result<ComputedField> {
        let source = |path: &String| -> Result<usize> {
            match index.get(path) {
                Some(FieldRef::Register(i)) => Ok(*i),
                _ => Err(ColdroomError::SchemaLoad(format!(
                    "computed {}: unknown source '{}'",
                    decl.name, path
                ))),
            }
        };
        let sources = decl.source.iter().map(source).collect::<Result<Vec<_>>>()?;
        let require_type = |i: usize, expected: FieldType| -> Result<()> {
            if fields[i].field_type != expected {
                return Err(ColdroomError::SchemaLoad(format!(
                    "computed {}: source '{}' is {}, expected {}",
                    decl.name, fields[i].path, fields[i].field_type, expected
                )));
            }
            Ok(())
        };
        let single = || -> Result<usize> {
            match sources.as_slice() {
                [one] => Ok(*one),
                _ => Err(ColdroomError::SchemaLoad(format!(
                    "computed {}: expects exactly one source",
                    decl.name
                ))),
            }
        };

        let rule = match decl.rule {
            RuleDecl::Copy => {
                let i = single()?;
                require_type(i, decl.field_type)?;
                ComputedRule::Copy(i)
            },
            RuleDecl::Not => {
                let i = single()?;
                require_type(i, FieldType::Bool)?;
                ComputedRule::Not(i)
            },
            RuleDecl::AnyOf => {
                for &i in &sources {
                    require_type(i, FieldType::Bool)?;
                }
                ComputedRule::AnyOf(sources)
            },
            RuleDecl::AnyTagged => {
                let tag = decl.tag.ok_or_else(|| {
                    ColdroomError::SchemaLoad(format!("computed {}: 'tag' is required", decl.name))
                })?;
                let members = fields
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| f.has_tag(tag) && f.field_type == FieldType::Bool)
                    .map(|(i, _)| i)
                    .collect();
                ComputedRule::AnyTagged(members)
            },
        };

        if !matches!(rule, ComputedRule::Copy(_)) && decl.field_type != FieldType::Bool {
            return Err(ColdroomError::SchemaLoad(format!(
                "computed {}: boolean rule with type {}",
                decl.name, decl.field_type
            )));
        }

        Ok(ComputedField {
            path: decl.name.clone(),
            field_type: decl.field_type,
            tags: TagSet::empty().with(Tag::Computed),
            description: decl.description.trim().to_string(),
            units: decl.units.clone(),
            rule,
        })
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Total register length of the map
    pub fn total_registers(&self) -> u16 {
        self.total_registers
    }

    /// Register-backed leaves in allocation order
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn computed_fields(&self) -> &[ComputedField] {
        &self.computed
    }

    pub fn blocks(&self) -> &[BlockInfo] {
        &self.blocks
    }

    pub fn resolve(&self, path: &str) -> Result<FieldRef> {
        self.index
            .get(path)
            .copied()
            .ok_or_else(|| ColdroomError::FieldNotFound(path.to_string()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Register-backed descriptor for `path`
    pub fn get_field(&self, path: &str) -> Result<&FieldDescriptor> {
        match self.resolve(path)? {
            FieldRef::Register(i) => Ok(&self.fields[i]),
            FieldRef::Computed(_) => Err(ColdroomError::FieldNotFound(format!(
                "{} (computed, not register-backed)",
                path
            ))),
        }
    }

    pub fn get_computed(&self, path: &str) -> Result<&ComputedField> {
        match self.resolve(path)? {
            FieldRef::Computed(i) => Ok(&self.computed[i]),
            FieldRef::Register(_) => Err(ColdroomError::FieldNotFound(format!(
                "{} (not computed)",
                path
            ))),
        }
    }

    /// Leaves carrying every tag in `tags`
    pub fn get_fields_tagged_as(&self, tags: &[Tag]) -> Result<Vec<&FieldDescriptor>> {
        if tags.is_empty() {
            return Err(ColdroomError::InvalidTagQuery("empty tag list".to_string()));
        }
        let wanted: TagSet = tags.iter().copied().collect();
        Ok(self
            .fields
            .iter()
            .filter(|f| f.tags.contains_all(wanted))
            .collect())
    }

    /// Leaves carrying none of `tags`
    pub fn get_fields_not_tagged_as(&self, tags: &[Tag]) -> Result<Vec<&FieldDescriptor>> {
        if tags.is_empty() {
            return Err(ColdroomError::InvalidTagQuery("empty tag list".to_string()));
        }
        let excluded: TagSet = tags.iter().copied().collect();
        Ok(self
            .fields
            .iter()
            .filter(|f| f.tags.contains_none(excluded))
            .collect())
    }

    /// Tag query from wire names, e.g. `["PARAM", "PID"]`
    pub fn get_fields_tagged_as_names<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<&FieldDescriptor>> {
        let tags = names
            .iter()
            .map(|n| n.as_ref().parse::<Tag>())
            .collect::<Result<Vec<_>>>()?;
        self.get_fields_tagged_as(&tags)
    }

    pub fn alarm_fields(&self) -> Vec<&FieldDescriptor> {
        self.tagged(Tag::Alarm).collect()
    }

    pub fn parameter_fields(&self) -> Vec<&FieldDescriptor> {
        self.tagged(Tag::Param).collect()
    }

    /// IODATA leaves worth recording; reserved slots are skipped
    pub fn measurement_fields(&self) -> Vec<&FieldDescriptor> {
        self.tagged(Tag::IoData)
            .filter(|f| !f.has_tag(Tag::Reserved) && !f.is_hidden())
            .collect()
    }

    fn tagged(&self, tag: Tag) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(move |f| f.has_tag(tag))
    }

    /// Union of all tags in use
    pub fn tags_in_use(&self) -> TagSet {
        self.fields
            .iter()
            .fold(TagSet::empty(), |acc, f| acc.union(f.tags))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const TWO_BOOLS_THEN_U32: &str = r#"
blocks:
  - name: A
    kind: struct
    fields:
      - { name: first, type: bool }
      - { name: second, type: bool }
      - { name: counter, type: u32, tags: [PARAM], eeprom: true }
"#;

    #[test]
    fn test_bools_then_scalar_layout() {
        let schema = MemoryMapSchema::from_yaml(TWO_BOOLS_THEN_U32).unwrap();
        let first = schema.get_field("first").unwrap();
        let second = schema.get_field("second").unwrap();
        let counter = schema.get_field("counter").unwrap();
        assert_eq!((first.offset, first.bit), (0, Some(0)));
        assert_eq!((second.offset, second.bit), (0, Some(1)));
        assert_eq!((counter.offset, counter.bit, counter.size), (1, None, 2));
        assert_eq!(schema.total_registers(), 3);
    }

    #[test]
    fn test_consecutive_bools_pack_sixteen_per_register() {
        let mut yaml = String::from("blocks:\n  - name: B\n    kind: struct\n    fields:\n");
        yaml.push_str("      - { name: lead, type: u16 }\n");
        for k in 0..40 {
            yaml.push_str(&format!("      - {{ name: b{}, type: bool }}\n", k));
        }
        let schema = MemoryMapSchema::from_yaml(&yaml).unwrap();
        let base = 1;
        for k in 0..40u16 {
            let f = schema.get_field(&format!("b{}", k)).unwrap();
            assert_eq!(f.offset, base + k / 16, "b{}", k);
            assert_eq!(f.bit, Some((k % 16) as u8), "b{}", k);
        }
        // 40 bits: two full registers plus an open run
        assert_eq!(schema.total_registers(), 1 + 3);
    }

    #[test]
    fn test_struct_tags_merge_and_default() {
        let yaml = r#"
structs:
  Pid:
    fields:
      - { name: p, type: i16, eeprom: true }
      - { name: i, type: i16, tags: [SETTINGS] }
blocks:
  - name: C
    kind: struct
    fields:
      - { name: pidCold, struct: Pid, tags: [PARAM, PID], units: "ºC" }
      - { name: plain, type: f32 }
"#;
        let schema = MemoryMapSchema::from_yaml(yaml).unwrap();
        let p = schema.get_field("pidCold.p").unwrap();
        assert!(p.has_tag(Tag::Param) && p.has_tag(Tag::Pid));
        assert!(!p.has_tag(Tag::IoData));
        assert!(p.is_eeprom());
        assert_eq!(p.units.as_deref(), Some("ºC"));
        let i = schema.get_field("pidCold.i").unwrap();
        assert!(i.tags.contains_all(
            [Tag::Param, Tag::Pid, Tag::Settings].into_iter().collect()
        ));
        assert_eq!(i.offset, 1);
        let plain = schema.get_field("plain").unwrap();
        assert_eq!(plain.tags, TagSet::empty().with(Tag::IoData));
        assert_eq!(plain.offset, 2);
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let yaml = r#"
blocks:
  - name: D
    kind: struct
    fields:
      - { name: x, type: u16 }
      - { name: x, type: i16 }
"#;
        let err = MemoryMapSchema::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ColdroomError::SchemaLoad(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_unknown_struct_and_tag_rejected() {
        let yaml = "blocks:\n  - name: E\n    kind: struct\n    fields:\n      - { name: s, struct: Missing }\n";
        assert!(MemoryMapSchema::from_yaml(yaml).is_err());
        let yaml = "blocks:\n  - name: E\n    kind: struct\n    fields:\n      - { name: s, type: u16, tags: [BOGUS] }\n";
        assert!(MemoryMapSchema::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_bitfield_block_requires_bools() {
        let yaml = "blocks:\n  - name: F\n    kind: bitfield\n    fields:\n      - { name: s, type: u16 }\n";
        assert!(MemoryMapSchema::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_tag_queries() {
        let schema = MemoryMapSchema::from_yaml(TWO_BOOLS_THEN_U32).unwrap();
        let params = schema.get_fields_tagged_as(&[Tag::Param]).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].path, "counter");
        assert!(schema
            .get_fields_tagged_as(&[Tag::Param, Tag::Alarm])
            .unwrap()
            .is_empty());
        let others = schema.get_fields_not_tagged_as(&[Tag::Param]).unwrap();
        assert_eq!(others.len(), 2);
        assert!(matches!(
            schema.get_fields_tagged_as(&[]),
            Err(ColdroomError::InvalidTagQuery(_))
        ));
        assert!(matches!(
            schema.get_fields_tagged_as_names(&["PARAM", "NOPE"]),
            Err(ColdroomError::InvalidTagQuery(_))
        ));
    }

    #[test]
    fn test_get_field_unknown() {
        let schema = MemoryMapSchema::from_yaml(TWO_BOOLS_THEN_U32).unwrap();
        assert!(matches!(
            schema.get_field("nope"),
            Err(ColdroomError::FieldNotFound(_))
        ));
    }

    // ------------------------------------------------------------------
    // Bundled firmware map
    // ------------------------------------------------------------------

    #[test]
    fn test_bundled_map_layout() {
        let schema = MemoryMapSchema::bundled().unwrap();
        assert_eq!(schema.total_registers(), 381);

        let on_off = schema.get_field("onOffSystem").unwrap();
        assert_eq!(on_off.address(), "HR0.0");
        assert!(on_off.is_eeprom());

        let save_type = schema.get_field("eepromTypeToSave").unwrap();
        let save_addr = schema.get_field("eepromAddressToSave").unwrap();
        assert_eq!(save_type.offset, 260);
        assert_eq!(save_addr.offset, 261);

        let gas = schema.get_field("C2H4GasConcentration").unwrap();
        assert_eq!(gas.field_type, FieldType::U32);
        assert_eq!(gas.size, 2);

        let block17 = schema.blocks().iter().find(|b| b.name == "Block17").unwrap();
        assert_eq!(block17.start, 260);
    }

    #[test]
    fn test_bundled_map_paths_unique_and_slots_disjoint() {
        let schema = MemoryMapSchema::bundled().unwrap();
        let mut paths = HashSet::new();
        let mut slots = HashSet::new();
        for field in schema.fields() {
            assert!(paths.insert(field.path.as_str()), "{}", field.path);
            if !field.is_hidden() {
                assert!(slots.insert((field.offset, field.bit)), "{}", field.path);
            }
            assert!(field.offset + field.size <= schema.total_registers());
        }
        for computed in schema.computed_fields() {
            assert!(paths.insert(computed.path.as_str()), "{}", computed.path);
        }
    }

    #[test]
    fn test_bundled_struct_leaves() {
        let schema = MemoryMapSchema::bundled().unwrap();
        let p = schema.get_field("pidHumidity.pCoefficient").unwrap();
        assert!(p.tags.contains_all(
            [Tag::Param, Tag::Pid, Tag::Humidity].into_iter().collect()
        ));
        let span = schema.get_field("humiditySensor1.span").unwrap();
        assert!(span.has_tag(Tag::Sensor));
        assert_eq!(span.units.as_deref(), Some("HR%"));
    }

    #[test]
    fn test_bundled_convenience_sets() {
        let schema = MemoryMapSchema::bundled().unwrap();
        let alarms = schema.alarm_fields();
        assert!(!alarms.is_empty());
        assert!(alarms.iter().all(|f| f.field_type == FieldType::Bool));
        assert!(schema
            .parameter_fields()
            .iter()
            .any(|f| f.path == "CO2ControlSelection"));
        let measurements = schema.measurement_fields();
        assert!(measurements.iter().any(|f| f.path == "temperatureInside"));
        assert!(measurements.iter().all(|f| !f.has_tag(Tag::Reserved)));
        assert!(schema.get_computed("anyAlarm").is_ok());
        assert!(schema.get_field("anyAlarm").is_err());
    }
}

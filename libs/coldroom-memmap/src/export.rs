//! Human-readable memory map listing (JSON rows and CSV)

use crate::field::FieldType;
use crate::schema::MemoryMapSchema;
use crate::tags::TagSet;
use errors::{ColdroomError, Result};
use serde::Serialize;
use std::io::Write;

pub const CSV_HEADER: [&str; 9] = [
    "offset",
    "bit",
    "size",
    "type",
    "path",
    "description",
    "eeprom",
    "tags",
    "address",
];

/// One line of the memory map listing
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MemoryMapRow {
    /// `None` for computed fields
    pub offset: Option<u16>,
    pub bit: Option<u8>,
    pub size: u16,
    #[serde(rename = "type")]
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub field_type: FieldType,
    pub path: String,
    pub description: String,
    pub eeprom: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<String>))]
    pub tags: TagSet,
    /// `HR{offset}`, `HR{offset}.{bit}`, or `--` when not register-backed
    pub address: String,
}

impl MemoryMapSchema {
    /// Rows for every visible field, computed fields last
    pub fn export_rows(&self) -> Vec<MemoryMapRow> {
        self.rows(false)
    }

    /// Same as [`export_rows`](Self::export_rows) including `_` paths
    pub fn export_rows_with_reserved(&self) -> Vec<MemoryMapRow> {
        self.rows(true)
    }

    fn rows(&self, include_hidden: bool) -> Vec<MemoryMapRow> {
        let registers = self
            .fields()
            .iter()
            .filter(|f| include_hidden || !f.is_hidden())
            .map(|f| MemoryMapRow {
                offset: Some(f.offset),
                bit: f.bit,
                size: f.size,
                field_type: f.field_type,
                path: f.path.clone(),
                description: f.description.clone(),
                eeprom: f.is_eeprom(),
                tags: f.tags,
                address: f.address(),
            });
        let computed = self.computed_fields().iter().map(|c| MemoryMapRow {
            offset: None,
            bit: None,
            size: 0,
            field_type: c.field_type,
            path: c.path.clone(),
            description: c.description.clone(),
            eeprom: false,
            tags: c.tags,
            address: "--".to_string(),
        });
        registers.chain(computed).collect()
    }

    /// Write the visible rows as CSV; tags are `|`-joined
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        write_rows_csv(&self.export_rows(), writer)
    }
}

pub fn write_rows_csv<W: Write>(rows: &[MemoryMapRow], writer: W) -> Result<()> {
    let csv_err = |e: csv::Error| ColdroomError::Serialization(e.to_string());
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(CSV_HEADER).map_err(csv_err)?;
    for row in rows {
        out.write_record([
            row.offset.map(|o| o.to_string()).unwrap_or_default(),
            row.bit.map(|b| b.to_string()).unwrap_or_default(),
            row.size.to_string(),
            row.field_type.to_string(),
            row.path.clone(),
            row.description.clone(),
            row.eeprom.to_string(),
            row.tags.join("|"),
            row.address.clone(),
        ])
        .map_err(csv_err)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_rows_hide_reserved() {
        let schema = MemoryMapSchema::bundled().unwrap();
        let rows = schema.export_rows();
        assert!(rows.iter().all(|r| !r.path.starts_with('_')));
        let all = schema.export_rows_with_reserved();
        assert!(all.len() > rows.len());
        assert!(all.iter().any(|r| r.path == "_reserved_01_14"));

        let first = &rows[0];
        assert_eq!(first.path, "onOffSystem");
        assert_eq!(first.address, "HR0.0");
        assert!(first.eeprom);

        let computed = rows.iter().find(|r| r.path == "openDoor").unwrap();
        assert_eq!(computed.address, "--");
        assert_eq!(computed.offset, None);
    }

    #[test]
    fn test_csv_output() {
        let schema = MemoryMapSchema::bundled().unwrap();
        let mut buf = Vec::new();
        schema.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "offset,bit,size,type,path,description,eeprom,tags,address"
        );
        let gas = text
            .lines()
            .find(|l| l.contains(",C2H4GasConcentration,"))
            .unwrap();
        assert!(gas.contains(",u32,"));
        assert!(gas.contains("C2H4|GAS_BALANCE|PARAM"));
        assert_eq!(text.lines().count(), schema.export_rows().len() + 1);
    }
}

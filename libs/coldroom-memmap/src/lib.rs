//! Cold-room controller memory map
//!
//! The controller exposes its whole state as one contiguous run of Modbus
//! holding registers. This crate describes that run and converts it to and
//! from typed values.
//!
//! # Modules
//!
//! - `tags`: semantic tags and tag sets
//! - `field`: field types, descriptors and values
//! - `schema`: map declaration, loading and register allocation
//! - `computed`: derived fields
//! - `snapshot`: typed, path-addressable device state
//! - `codec`: register encoding and decoding
//! - `export`: JSON/CSV listing of the map
//!
//! # Example
//!
//! ```
//! use coldroom_memmap::{Codec, MemoryMapSchema};
//!
//! let schema = MemoryMapSchema::bundled().unwrap();
//! let codec = Codec::new(schema.clone());
//! let registers = vec![0u16; schema.total_registers() as usize];
//! let snapshot = codec.decode(&registers).unwrap();
//! assert!(snapshot.get_bool("systemOff").unwrap());
//! ```

pub mod codec;
pub mod computed;
pub mod export;
pub mod field;
pub mod schema;
pub mod snapshot;
pub mod tags;

pub use codec::{decode_value, encode_value, with_bit, Codec};
pub use computed::{ComputedField, ComputedRule};
pub use export::{write_rows_csv, MemoryMapRow};
pub use field::{FieldDescriptor, FieldType, Persistence, Value};
pub use schema::{BlockInfo, BlockKind, FieldRef, MemoryMapSchema, BUNDLED_MAP};
pub use snapshot::DeviceSnapshot;
pub use tags::{parse_tag, Tag, TagSet};

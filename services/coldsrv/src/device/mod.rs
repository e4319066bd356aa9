//! Device side: one client per controller

pub mod client;
pub mod messages;
pub mod state;

pub use client::{ClientResources, DeviceClient, EEPROM_TYPE_FIELD};
pub use messages::{DeviceMessage, MessageKind, MessageSource};
pub use state::{DeviceNotification, DeviceState, ErrorFlag};

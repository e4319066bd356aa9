pub mod admin_handlers;
pub mod alarm_handlers;
pub mod catalogue_handlers;
pub mod device_handlers;
pub mod health;
pub mod memory_map_handlers;
pub mod snapshot_handlers;

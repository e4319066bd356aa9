//! Cold-room gateway service
//!
//! Polls every configured cold-room controller over Modbus TCP, publishes
//! their live state, records measurements, alarms and parameter changes,
//! and forwards operator writes.
//!
//! # Modules
//!
//! - `config`: layered service configuration
//! - `storage`: event, history and catalogue stores (SQLite or in-memory)
//! - `device`: one client per controller, its state machine and messages
//! - `engine`: the polling loop and everything a tick produces
//! - `api`: HTTP routes
//! - `bootstrap`: process wiring

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod device;
pub mod engine;
pub mod storage;

pub use bootstrap::AppContext;
pub use engine::{EngineHandle, PollingEngine};

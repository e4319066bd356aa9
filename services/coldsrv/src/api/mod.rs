//! HTTP surface of the gateway

pub mod dto;
pub mod handlers;
pub mod routes;

pub use routes::{create_routes, AppState};

//! HTTP API for the gateway.

pub mod routes;
pub mod types;

pub use routes::{serve, AppState};

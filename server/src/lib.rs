//! HTTP/WebSocket façade crate. Split into a library so the binary
//! (`main.rs`) and the integration suite under `tests/` share the same
//! module tree instead of the tests re-declaring it.

pub mod auth;
pub mod db;
pub mod handlers;
pub mod infra;
pub mod middleware;
pub mod routes;
pub mod upload;

//! Admin API
//!
//! REST endpoints for inspecting and feeding the proxy ledger and pool.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};

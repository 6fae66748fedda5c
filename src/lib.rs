//! Proxy Rotor - rotating forward-proxy pool
//!
//! Keeps a ledger of upstream HTTP proxies and a hot pool of the healthy ones,
//! and forwards inbound requests through the least recently used proxy.
//!
//! ## Features
//!
//! - Health checking with tiered retry backoff
//! - Adaptive latency and reliability thresholds driven by pool utilisation
//! - Failover dispatch that demotes proxies on transport failures
//! - Admin API and bulk import from free-form proxy lists
//! - PostgreSQL or in-memory storage

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod proxy;
pub mod repository;
pub mod services;
pub mod store;

pub use config::Config;
pub use database::Database;
pub use error::{Result, RotorError};

//! Auxiliary services

pub mod ingest;

pub use ingest::{extract_addresses, ImportSummary, ProxyImporter};

//! Postgres connection management and schema migrations

pub mod migrations;
pub mod pool;

pub use pool::Database;

//! # Storage Module
//!
//! SQLite persistence: schema definitions and the row-level [`Database`]
//! handle shared by the key store, mapping store, and directories.

mod database;
mod schema;

pub use database::Database;
pub use schema::SCHEMA_VERSION;

//! Schema vault library.
//!
//! Introspects relational databases into a persistent per-connection schema
//! tree, validates generated SQL as read-only before execution, and drives a
//! resumable onboarding workflow over a local vault directory.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod tools;
pub mod vault;

pub use config::Config;
pub use db::{Connection, ConnectionResolver};
pub use error::{DbError, DbResult};
pub use vault::Vault;

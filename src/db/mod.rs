//! Database access layer.
//!
//! - Dialect registry (static per-kind profiles)
//! - Connection resolution and pool management
//! - Metadata queries for introspection
//! - Type normalization
//! - Database dispatch macros

pub mod dialect;
#[macro_use]
pub mod macros;
pub mod pool;
pub mod schema;
pub mod types;

pub use dialect::{DialectProfile, detect_kind, profile_for};
pub use pool::{Connection, ConnectionResolver, DbPool, PreparedConnection};

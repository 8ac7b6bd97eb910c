//! Connection-related data models.
//!
//! This module defines the closed set of database kinds and the display-safe
//! summaries handed out for registered connections.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Database kinds recognised from a connection string.
///
/// Not every kind has a dialect profile; see [`crate::db::dialect::profile_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    PostgreSQL,
    /// PostgreSQL wire protocol, warehouse planner
    Redshift,
    /// Includes MariaDB
    MySQL,
    SQLite,
    Snowflake,
    BigQuery,
    SqlServer,
}

impl DialectKind {
    pub const ALL: [DialectKind; 7] = [
        Self::PostgreSQL,
        Self::Redshift,
        Self::MySQL,
        Self::SQLite,
        Self::Snowflake,
        Self::BigQuery,
        Self::SqlServer,
    ];

    /// Get the display name for this database kind.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::Redshift => "Redshift",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
            Self::Snowflake => "Snowflake",
            Self::BigQuery => "BigQuery",
            Self::SqlServer => "SQL Server",
        }
    }

    /// Get the default port for this database kind.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::Redshift => Some(5439),
            Self::MySQL => Some(3306),
            Self::SqlServer => Some(1433),
            Self::SQLite | Self::Snowflake | Self::BigQuery => None,
        }
    }

    /// Kinds a URL scheme or driver token maps to.
    ///
    /// Returns an empty slice for unknown tokens and more than one kind for
    /// tokens that cannot be resolved without an override.
    pub fn for_token(token: &str) -> &'static [DialectKind] {
        match token.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => &[Self::PostgreSQL],
            "redshift" => &[Self::Redshift],
            "mysql" | "mariadb" => &[Self::MySQL],
            "sqlite" | "sqlite3" => &[Self::SQLite],
            "snowflake" => &[Self::Snowflake],
            "bigquery" => &[Self::BigQuery],
            "mssql" | "sqlserver" => &[Self::SqlServer],
            "odbc" | "jdbc" => &Self::ALL,
            _ => &[],
        }
    }
}

impl std::fmt::Display for DialectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for DialectKind {
    type Err = DbError;

    /// Parse an explicit dialect override (`postgresql`, `pg`, `mysql`, ...).
    fn from_str(s: &str) -> DbResult<Self> {
        match Self::for_token(s.trim()) {
            [kind] => Ok(*kind),
            _ => Err(DbError::unsupported_dialect(s.trim())),
        }
    }
}

/// Connection information returned by `list` (no secrets exposed).
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub name: String,
    pub kind: DialectKind,
    /// Connection string with the password masked.
    pub masked_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
}

/// Validate a connection name; names double as vault directory names.
pub fn validate_connection_name(name: &str) -> DbResult<()> {
    if name.is_empty() {
        return Err(DbError::invalid_input("Connection name cannot be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DbError::invalid_input(format!(
            "Connection name contains invalid characters: {}",
            name
        )));
    }
    Ok(())
}

/// Get a display-safe version of a connection string (credentials masked).
pub fn mask_connection_string(connection_string: &str) -> String {
    if let Some(at_pos) = connection_string.rfind('@') {
        let scheme_end = connection_string.find("://").map(|p| p + 3).unwrap_or(0);
        if let Some(colon_pos) = connection_string[scheme_end..at_pos].rfind(':') {
            let colon_pos = scheme_end + colon_pos;
            let prefix = &connection_string[..colon_pos + 1];
            let suffix = &connection_string[at_pos..];
            return format!("{}****{}", prefix, suffix);
        }
    }
    connection_string.to_string()
}

//! On-disk vault layout.
//!
//! ```text
//! <root>/.migrations.json              global migration ledger
//! <root>/<connection>/schema.json      schema tree
//! <root>/<connection>/onboarding.json  onboarding state
//! <root>/<connection>/ignore.txt       ignore rules
//! ```
//!
//! Every document is read and written whole. A missing schema file loads as an
//! empty tree and a missing onboarding file as a fresh `init` state.

pub mod atomic;

use crate::error::{DbError, DbResult};
use crate::models::connection::validate_connection_name;
use crate::models::{CatalogPath, MigrationLedger, OnboardingState, SchemaTree};
use crate::tools::ignore::IgnoreRules;
use atomic::{read_json, write_json_atomic};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const MIGRATIONS_FILE: &str = ".migrations.json";
pub const SCHEMA_FILE: &str = "schema.json";
pub const ONBOARDING_FILE: &str = "onboarding.json";
pub const IGNORE_FILE: &str = "ignore.txt";

/// Root of the knowledge vault.
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
}

impl Vault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn connection_dir(&self, connection: &str) -> PathBuf {
        self.root.join(connection)
    }

    pub fn schema_path(&self, connection: &str) -> PathBuf {
        self.connection_dir(connection).join(SCHEMA_FILE)
    }

    pub fn onboarding_path(&self, connection: &str) -> PathBuf {
        self.connection_dir(connection).join(ONBOARDING_FILE)
    }

    pub fn ignore_path(&self, connection: &str) -> PathBuf {
        self.connection_dir(connection).join(IGNORE_FILE)
    }

    pub fn migrations_path(&self) -> PathBuf {
        self.root.join(MIGRATIONS_FILE)
    }

    /// Connection directories present in the vault, sorted.
    ///
    /// Entries whose names are not valid connection names are skipped.
    pub fn list_connections(&self) -> DbResult<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DbError::internal(format!(
                    "Failed to list vault {}: {}",
                    self.root.display(),
                    e
                )));
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| validate_connection_name(name).is_ok())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Create the connection's directory if missing.
    pub fn ensure_connection_dir(&self, connection: &str) -> DbResult<PathBuf> {
        validate_connection_name(connection)?;
        let dir = self.connection_dir(connection);
        fs::create_dir_all(&dir)
            .map_err(|e| DbError::persistence(dir.display().to_string(), e.to_string()))?;
        Ok(dir)
    }

    // Schema store

    pub fn load_schema(&self, connection: &str) -> DbResult<SchemaTree> {
        validate_connection_name(connection)?;
        Ok(read_json(&self.schema_path(connection))?.unwrap_or_default())
    }

    pub fn save_schema(&self, connection: &str, tree: &SchemaTree) -> DbResult<()> {
        validate_connection_name(connection)?;
        let path = self.schema_path(connection);
        write_json_atomic(&path, tree)?;
        let stats = tree.stats();
        debug!(
            connection = %connection,
            schemas = stats.schemas,
            tables = stats.tables,
            "Saved schema tree"
        );
        Ok(())
    }

    /// Set or clear the curated description of one node.
    pub fn update_description(
        &self,
        connection: &str,
        path: &CatalogPath,
        text: Option<String>,
    ) -> DbResult<()> {
        let mut tree = self.load_schema(connection)?;
        tree.set_description(path, text)?;
        self.save_schema(connection, &tree)
    }

    // Onboarding state

    pub fn load_onboarding(&self, connection: &str) -> DbResult<OnboardingState> {
        validate_connection_name(connection)?;
        Ok(read_json(&self.onboarding_path(connection))?
            .unwrap_or_else(|| OnboardingState::new(connection)))
    }

    pub fn save_onboarding(&self, state: &OnboardingState) -> DbResult<()> {
        validate_connection_name(&state.connection)?;
        write_json_atomic(&self.onboarding_path(&state.connection), state)
    }

    // Ignore rules

    /// Rules from `ignore.txt`; no file means no rules.
    pub fn load_ignore_rules(&self, connection: &str) -> DbResult<IgnoreRules> {
        validate_connection_name(connection)?;
        let path = self.ignore_path(connection);
        match fs::read_to_string(&path) {
            Ok(text) => IgnoreRules::parse(&text),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(IgnoreRules::empty()),
            Err(e) => Err(DbError::internal(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    // Migration ledger

    pub fn load_ledger(&self) -> DbResult<MigrationLedger> {
        Ok(read_json(&self.migrations_path())?.unwrap_or_default())
    }

    pub fn save_ledger(&self, ledger: &MigrationLedger) -> DbResult<()> {
        write_json_atomic(&self.migrations_path(), ledger)
    }
}

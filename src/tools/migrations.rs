//! One-time vault format upgrades.
//!
//! Migrations form an explicit ordered list. Each `(migration, connection)`
//! pair runs at most once; the global ledger is written after every
//! successful application, before the next migration starts. A failing
//! migration is reported and the remaining ones still run.

use crate::error::{DbError, DbResult};
use crate::models::{
    CatalogPath, FailedMigration, Listed, MigrationReport, SchemaTree, TableNode, TableType,
};
use crate::vault::atomic::{read_json, write_json_atomic};
use crate::vault::{IGNORE_FILE, ONBOARDING_FILE, SCHEMA_FILE, Vault};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Receives the connection name and its vault directory.
pub type MigrationFn = fn(&str, &Path) -> DbResult<()>;

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub id: &'static str,
    pub description: &'static str,
    pub apply: MigrationFn,
}

/// Built-in migrations, in application order.
pub fn builtin_migrations() -> Vec<Migration> {
    vec![
        Migration {
            id: "0001_rename_legacy_ignore_file",
            description: "Rename .vaultignore to ignore.txt",
            apply: rename_legacy_ignore_file,
        },
        Migration {
            id: "0002_normalize_onboarding_phase",
            description: "Rewrite legacy onboarding phase names",
            apply: normalize_onboarding_phase,
        },
        Migration {
            id: "0003_convert_flat_table_index",
            description: "Convert tables.json into a schema.json skeleton",
            apply: convert_flat_table_index,
        },
    ]
}

/// Applies migrations to connections and keeps the ledger.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    vault: Vault,
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    /// Fails if two migrations share an id.
    pub fn new(vault: Vault, migrations: Vec<Migration>) -> DbResult<Self> {
        let mut seen = HashSet::new();
        for m in &migrations {
            if !seen.insert(m.id) {
                return Err(DbError::invalid_input(format!(
                    "Duplicate migration id: {}",
                    m.id
                )));
            }
        }
        Ok(Self { vault, migrations })
    }

    pub fn builtin(vault: Vault) -> DbResult<Self> {
        Self::new(vault, builtin_migrations())
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Apply every pending migration to `connection`.
    ///
    /// Only a failure to write the ledger is returned as an error.
    pub fn run(&self, connection: &str) -> DbResult<MigrationReport> {
        crate::models::connection::validate_connection_name(connection)?;
        let dir = self.vault.connection_dir(connection);
        let mut ledger = self.vault.load_ledger()?;
        let mut report = MigrationReport {
            connection: connection.to_string(),
            ..Default::default()
        };

        for migration in &self.migrations {
            if ledger.is_applied(migration.id, connection) {
                report.skipped.push(migration.id.to_string());
                continue;
            }

            match (migration.apply)(connection, &dir) {
                Ok(()) => {
                    ledger.mark_applied(migration.id, connection);
                    self.vault.save_ledger(&ledger)?;
                    debug!(
                        connection = %connection,
                        migration = migration.id,
                        "Migration applied"
                    );
                    report.applied.push(migration.id.to_string());
                }
                Err(e) => {
                    let failure = DbError::migration_failed(migration.id, e.to_string());
                    warn!(connection = %connection, error = %failure, "Migration failed");
                    report.failed.push(FailedMigration {
                        id: migration.id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if !report.applied.is_empty() || !report.failed.is_empty() {
            info!(
                connection = %connection,
                applied = report.applied.len(),
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                "Migrations run"
            );
        }
        Ok(report)
    }

    /// Run for every connection directory in the vault.
    pub fn run_all(&self) -> DbResult<Vec<MigrationReport>> {
        self.vault
            .list_connections()?
            .iter()
            .map(|connection| self.run(connection))
            .collect()
    }
}

fn io_error(path: &Path, e: std::io::Error) -> DbError {
    DbError::internal(format!("{}: {}", path.display(), e))
}

const LEGACY_IGNORE_FILE: &str = ".vaultignore";
const LEGACY_TABLE_INDEX: &str = "tables.json";

fn rename_legacy_ignore_file(_connection: &str, dir: &Path) -> DbResult<()> {
    let legacy = dir.join(LEGACY_IGNORE_FILE);
    let target = dir.join(IGNORE_FILE);
    if !legacy.is_file() || target.exists() {
        return Ok(());
    }
    fs::rename(&legacy, &target).map_err(|e| io_error(&legacy, e))
}

/// Current name for a legacy phase spelling.
fn normalize_phase_name(raw: &str) -> Option<&'static str> {
    let key = raw.trim().to_lowercase().replace(['-', ' '], "_");
    let phase = match key.as_str() {
        "init" | "initial" | "new" | "not_started" => "init",
        "discovery" | "discovering" => "discovery",
        "review" | "reviewing" => "review",
        "domain" | "domain_building" | "domainbuilding" => "domain_building",
        "complete" | "completed" | "done" => "complete",
        _ => return None,
    };
    Some(phase)
}

fn normalize_onboarding_phase(connection: &str, dir: &Path) -> DbResult<()> {
    let path = dir.join(ONBOARDING_FILE);
    let Some(mut doc) = read_json::<Value>(&path)? else {
        return Ok(());
    };
    let Some(obj) = doc.as_object_mut() else {
        return Err(DbError::invalid_input("Onboarding state is not a JSON object"));
    };

    let raw = obj
        .get("phase")
        .and_then(Value::as_str)
        .unwrap_or("init")
        .to_string();
    let phase = normalize_phase_name(&raw)
        .ok_or_else(|| DbError::invalid_input(format!("Unknown onboarding phase '{}'", raw)))?;

    let mut changed = raw != phase;
    obj.insert("phase".to_string(), Value::from(phase));

    // Older documents predate these fields
    let now = Value::from(Utc::now().to_rfc3339());
    for (key, value) in [
        ("connection", Value::from(connection)),
        ("started_at", now.clone()),
        ("updated_at", now),
    ] {
        if !obj.contains_key(key) {
            obj.insert(key.to_string(), value);
            changed = true;
        }
    }

    if changed {
        write_json_atomic(&path, &doc)?;
    }
    Ok(())
}

/// Legacy `tables.json` entries are `schema.table` or `catalog.schema.table`;
/// two-part entries are placed under a catalog named after the connection.
fn convert_flat_table_index(connection: &str, dir: &Path) -> DbResult<()> {
    let legacy = dir.join(LEGACY_TABLE_INDEX);
    let target = dir.join(SCHEMA_FILE);
    if target.exists() {
        return Ok(());
    }
    let Some(entries) = read_json::<Vec<String>>(&legacy)? else {
        return Ok(());
    };

    let mut grouped: Vec<(CatalogPath, Vec<TableNode>)> = Vec::new();
    for entry in &entries {
        let path = match entry.split('.').collect::<Vec<_>>().as_slice() {
            [schema, table] => CatalogPath::table(connection, *schema, *table),
            [catalog, schema, table] => CatalogPath::table(*catalog, *schema, *table),
            _ => {
                return Err(DbError::invalid_input(format!(
                    "Unrecognized table index entry '{}'",
                    entry
                )));
            }
        };
        let Some(schema) = path.parent() else {
            continue;
        };
        let table = TableNode::new(path.name(), TableType::Table);
        match grouped.iter_mut().find(|(s, _)| *s == schema) {
            Some((_, tables)) => tables.push(table),
            None => grouped.push((schema, vec![table])),
        }
    }

    let mut tree = SchemaTree::new();
    for (schema, tables) in grouped {
        let segments = schema.segments();
        tree.merge_schemas(&segments[0], &[Listed::new(&segments[1], false)], false);
        tree.merge_tables(&segments[0], &segments[1], tables);
    }

    write_json_atomic(&target, &tree)?;
    fs::remove_file(&legacy).map_err(|e| io_error(&legacy, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_ids_ordered_and_unique() {
        let ids: Vec<_> = builtin_migrations().iter().map(|m| m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert!(MigrationRunner::builtin(Vault::new("unused")).is_ok());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let m = builtin_migrations()[0];
        assert!(MigrationRunner::new(Vault::new("unused"), vec![m, m]).is_err());
    }

    #[test]
    fn test_normalize_phase_name() {
        assert_eq!(normalize_phase_name("DOMAIN"), Some("domain_building"));
        assert_eq!(normalize_phase_name("done"), Some("complete"));
        assert_eq!(normalize_phase_name("DISCOVERY"), Some("discovery"));
        assert_eq!(normalize_phase_name("Domain-Building"), Some("domain_building"));
        assert_eq!(normalize_phase_name("archived"), None);
    }

    #[test]
    fn test_rename_legacy_ignore_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".vaultignore"), "schema:tmp_*\n").unwrap();
        rename_legacy_ignore_file("sales", dir.path()).unwrap();
        assert!(!dir.path().join(".vaultignore").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("ignore.txt")).unwrap(),
            "schema:tmp_*\n"
        );

        // Absent legacy file is a no-op
        rename_legacy_ignore_file("sales", dir.path()).unwrap();
    }

    #[test]
    fn test_rename_keeps_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".vaultignore"), "old\n").unwrap();
        fs::write(dir.path().join("ignore.txt"), "new\n").unwrap();
        rename_legacy_ignore_file("sales", dir.path()).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("ignore.txt")).unwrap(),
            "new\n"
        );
    }

    #[test]
    fn test_normalize_onboarding_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ONBOARDING_FILE);
        fs::write(&path, r#"{"phase": "DOMAIN", "tables_discovered": 4}"#).unwrap();

        normalize_onboarding_phase("sales", dir.path()).unwrap();
        let state: crate::models::OnboardingState = read_json(&path).unwrap().unwrap();
        assert_eq!(state.phase, crate::models::Phase::DomainBuilding);
        assert_eq!(state.connection, "sales");
        assert_eq!(state.tables_discovered, 4);
    }

    #[test]
    fn test_normalize_unknown_phase_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(ONBOARDING_FILE), r#"{"phase": "archived"}"#).unwrap();
        assert!(normalize_onboarding_phase("sales", dir.path()).is_err());
    }

    #[test]
    fn test_convert_flat_table_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("tables.json"),
            r#"["public.users", "public.orders", "wh.sales.deals"]"#,
        )
        .unwrap();

        convert_flat_table_index("shop", dir.path()).unwrap();
        assert!(!dir.path().join("tables.json").exists());

        let tree: SchemaTree = read_json(&dir.path().join(SCHEMA_FILE)).unwrap().unwrap();
        assert!(tree.table("shop", "public", "users").is_some());
        assert!(tree.table("shop", "public", "orders").is_some());
        assert!(tree.table("wh", "sales", "deals").is_some());
    }

    #[test]
    fn test_convert_skips_when_schema_exists() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tables.json"), r#"["public.users"]"#).unwrap();
        write_json_atomic(&dir.path().join(SCHEMA_FILE), &SchemaTree::new()).unwrap();

        convert_flat_table_index("shop", dir.path()).unwrap();
        assert!(dir.path().join("tables.json").exists());
    }
}

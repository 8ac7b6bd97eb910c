//! Integration tests for the vault migration runner.

use schema_vault::error::{DbError, DbResult};
use schema_vault::models::Phase;
use schema_vault::tools::{Migration, MigrationRunner, builtin_migrations};
use schema_vault::vault::Vault;
use std::fs;
use std::path::Path;

fn setup_legacy_vault() -> (tempfile::TempDir, Vault) {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::new(dir.path());

    let sales = vault.ensure_connection_dir("sales").unwrap();
    fs::write(sales.join(".vaultignore"), "schema:scratch\n").unwrap();
    fs::write(
        sales.join("onboarding.json"),
        r#"{"connection": "sales", "phase": "DONE", "started_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-02T00:00:00Z"}"#,
    )
    .unwrap();

    let hr = vault.ensure_connection_dir("hr").unwrap();
    fs::write(hr.join("tables.json"), r#"["people.staff", "people.contracts"]"#).unwrap();

    (dir, vault)
}

#[test]
fn test_builtin_migrations_upgrade_legacy_vault() {
    let (_dir, vault) = setup_legacy_vault();
    let runner = MigrationRunner::builtin(vault.clone()).unwrap();

    let reports = runner.run_all().unwrap();
    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert_eq!(report.applied.len(), 3, "{:?}", report);
        assert!(report.failed.is_empty());
    }

    let rules = vault.load_ignore_rules("sales").unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(vault.load_onboarding("sales").unwrap().phase, Phase::Complete);

    let tree = vault.load_schema("hr").unwrap();
    assert!(tree.table("hr", "people", "staff").is_some());
    assert!(!vault.connection_dir("hr").join("tables.json").exists());
}

#[test]
fn test_second_run_skips_everything() {
    let (_dir, vault) = setup_legacy_vault();
    let runner = MigrationRunner::builtin(vault.clone()).unwrap();
    runner.run_all().unwrap();
    let ledger_before = fs::read_to_string(vault.migrations_path()).unwrap();

    let reports = runner.run_all().unwrap();
    for report in &reports {
        assert!(report.applied.is_empty());
        assert_eq!(report.skipped.len(), 3);
    }
    // Ledger untouched by a no-op run
    assert_eq!(fs::read_to_string(vault.migrations_path()).unwrap(), ledger_before);

    let ledger = vault.load_ledger().unwrap();
    let record = ledger.record("0001_rename_legacy_ignore_file").unwrap();
    assert_eq!(record.applied_to.len(), 2);
}

#[test]
fn test_new_connection_gets_migrated_later() {
    let (_dir, vault) = setup_legacy_vault();
    let runner = MigrationRunner::builtin(vault.clone()).unwrap();
    runner.run_all().unwrap();

    vault.ensure_connection_dir("ops").unwrap();
    let report = runner.run("ops").unwrap();
    assert_eq!(report.applied.len(), 3);
    assert!(vault.load_ledger().unwrap().is_applied("0003_convert_flat_table_index", "ops"));
}

fn always_fails(_connection: &str, _dir: &Path) -> DbResult<()> {
    Err(DbError::internal("disk layout not recognised"))
}

fn touch_marker(_connection: &str, dir: &Path) -> DbResult<()> {
    fs::write(dir.join("marker"), "").map_err(|e| DbError::internal(e.to_string()))
}

#[test]
fn test_failure_does_not_abort_remaining() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::new(dir.path());
    vault.ensure_connection_dir("sales").unwrap();

    let runner = MigrationRunner::new(
        vault.clone(),
        vec![
            Migration {
                id: "0001_broken",
                description: "Always fails",
                apply: always_fails,
            },
            Migration {
                id: "0002_marker",
                description: "Writes a marker file",
                apply: touch_marker,
            },
        ],
    )
    .unwrap();

    let report = runner.run("sales").unwrap();
    assert_eq!(report.applied, vec!["0002_marker"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "0001_broken");
    assert!(report.failed[0].error.contains("disk layout"));
    assert!(vault.connection_dir("sales").join("marker").exists());

    // The failed migration stays pending and is retried
    let ledger = vault.load_ledger().unwrap();
    assert!(!ledger.is_applied("0001_broken", "sales"));
    let report = runner.run("sales").unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.skipped, vec!["0002_marker"]);
}

#[test]
fn test_unreadable_ledger_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::new(dir.path());
    vault.ensure_connection_dir("sales").unwrap();
    fs::write(vault.migrations_path(), "not json").unwrap();

    let runner = MigrationRunner::new(vault, builtin_migrations()).unwrap();
    assert!(runner.run("sales").is_err());
}

#[test]
fn test_empty_vault() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MigrationRunner::builtin(Vault::new(dir.path().join("absent"))).unwrap();
    assert!(runner.run_all().unwrap().is_empty());
}

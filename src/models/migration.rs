//! Migration tracking models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tracking entry for one migration id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Last time this migration was applied to any connection
    pub run_at: DateTime<Utc>,
    /// Connections this migration has been applied to, each at most once
    #[serde(default)]
    pub applied_to: Vec<String>,
}

/// The global tracking document, keyed by migration id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MigrationLedger {
    records: BTreeMap<String, MigrationRecord>,
}

impl MigrationLedger {
    pub fn is_applied(&self, id: &str, connection: &str) -> bool {
        self.records
            .get(id)
            .is_some_and(|r| r.applied_to.iter().any(|c| c == connection))
    }

    /// Record `(id, connection)`; a pair already present is left untouched.
    pub fn mark_applied(&mut self, id: &str, connection: &str) {
        if self.is_applied(id, connection) {
            return;
        }
        let now = Utc::now();
        let record = self
            .records
            .entry(id.to_string())
            .or_insert_with(|| MigrationRecord {
                run_at: now,
                applied_to: Vec::new(),
            });
        record.run_at = now;
        record.applied_to.push(connection.to_string());
    }

    pub fn record(&self, id: &str) -> Option<&MigrationRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedMigration {
    pub id: String,
    pub error: String,
}

/// Aggregate outcome of running migrations for one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub connection: String,
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedMigration>,
}

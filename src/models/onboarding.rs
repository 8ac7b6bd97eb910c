//! Onboarding state models.
//!
//! A connection moves through `init -> discovery -> review -> domain_building ->
//! complete`; `reset` returns to `init` from anywhere. Discovery is resumable:
//! the state carries the ordered schema units planned for this run and a cursor
//! counting the units fully processed so far.

use crate::error::{DbError, DbResult};
use crate::models::schema::CatalogPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Onboarding phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Init,
    Discovery,
    Review,
    DomainBuilding,
    Complete,
}

impl Phase {
    /// The only phase reachable from this one by forward progression.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Self::Init => Some(Self::Discovery),
            Self::Discovery => Some(Self::Review),
            Self::Review => Some(Self::DomainBuilding),
            Self::DomainBuilding => Some(Self::Complete),
            Self::Complete => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Discovery => "discovery",
            Self::Review => "review",
            Self::DomainBuilding => "domain_building",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingState {
    pub connection: String,
    pub phase: Phase,
    #[serde(default)]
    pub tables_discovered: u64,
    #[serde(default)]
    pub tables_reviewed: u64,
    /// Schema units planned for the current discovery run, in processing order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<CatalogPath>,
    /// Number of units fully processed
    #[serde(default)]
    pub cursor: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completed: Option<CatalogPath>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl OnboardingState {
    pub fn new(connection: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            connection: connection.into(),
            phase: Phase::Init,
            tables_discovered: 0,
            tables_reviewed: 0,
            units: Vec::new(),
            cursor: 0,
            last_completed: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Units not yet processed.
    pub fn pending_units(&self) -> &[CatalogPath] {
        &self.units[self.cursor.min(self.units.len())..]
    }

    pub fn discovery_finished(&self) -> bool {
        self.cursor >= self.units.len()
    }

    /// Advance to `to`, which must be the next phase.
    pub fn transition(&mut self, to: Phase) -> DbResult<()> {
        if self.phase.next() != Some(to) {
            return Err(DbError::invalid_transition(self.phase, to));
        }
        self.phase = to;
        self.touch();
        if to == Phase::Complete {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Record a fully processed unit.
    pub fn complete_unit(&mut self, unit: CatalogPath, tables: u64) {
        self.cursor += 1;
        self.tables_discovered += tables;
        self.last_completed = Some(unit);
        self.touch();
    }

    /// Back to `init`: counters, plan and cursor cleared.
    pub fn reset(&mut self) {
        self.phase = Phase::Init;
        self.tables_discovered = 0;
        self.tables_reviewed = 0;
        self.units.clear();
        self.cursor = 0;
        self.last_completed = None;
        self.completed_at = None;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

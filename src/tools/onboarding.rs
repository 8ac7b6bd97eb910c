//! Onboarding state machine.
//!
//! Drives one connection through `init -> discovery -> review ->
//! domain_building -> complete`. Discovery is processed in chunks of schema
//! units so it can be driven by many short calls; after each unit the schema
//! tree is saved and then the state, so an interrupted call resumes at the
//! first unit not fully recorded.
//!
//! Calls for the same connection are serialized; different connections
//! proceed independently.

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::{DbError, DbResult};
use crate::models::{CatalogPath, OnboardingState, Phase};
use crate::tools::ignore::IgnoreRules;
use crate::tools::introspect::{self, DiscoveryScope, MetadataSource};
use crate::vault::Vault;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Outcome of one discovery call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkReport {
    pub connection: String,
    /// Phase after the call
    pub phase: Phase,
    /// Units fully processed by this call
    pub processed: Vec<CatalogPath>,
    /// Units still pending
    pub remaining: usize,
    pub tables_discovered: u64,
}

impl ChunkReport {
    fn from_state(state: &OnboardingState, processed: Vec<CatalogPath>) -> Self {
        Self {
            connection: state.connection.clone(),
            phase: state.phase,
            processed,
            remaining: state.pending_units().len(),
            tables_discovered: state.tables_discovered,
        }
    }
}

/// Onboarding driver over a vault.
#[derive(Debug)]
pub struct Onboarder {
    vault: Vault,
    chunk_size: usize,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Onboarder {
    pub fn new(vault: Vault) -> Self {
        Self {
            vault,
            chunk_size: DEFAULT_CHUNK_SIZE,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Units processed per discovery call (at least 1).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// Serialize operations on one connection.
    async fn lock(&self, connection: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(connection.to_string()).or_default())
        }; // Registry lock released here
        lock.lock_owned().await
    }

    /// Current persisted state (fresh `init` if none).
    pub async fn status(&self, connection: &str) -> DbResult<OnboardingState> {
        let _guard = self.lock(connection).await;
        self.vault.load_onboarding(connection)
    }

    /// Process up to `chunk_size` pending schema units.
    ///
    /// The first call plans the run and moves `init -> discovery`; the call
    /// that finishes the last unit moves `discovery -> review`. In `review`
    /// or later this is a no-op. A failed unit leaves the cursor where it
    /// was.
    pub async fn discover_chunk<S: MetadataSource>(
        &self,
        connection: &str,
        source: &S,
        rules: &IgnoreRules,
        scope: &DiscoveryScope,
    ) -> DbResult<ChunkReport> {
        let _guard = self.lock(connection).await;
        let mut state = self.vault.load_onboarding(connection)?;

        if state.phase > Phase::Discovery {
            debug!(connection = %connection, phase = %state.phase, "Discovery already finished");
            return Ok(ChunkReport::from_state(&state, Vec::new()));
        }

        let mut tree = self.vault.load_schema(connection)?;

        if state.phase == Phase::Init {
            let plan = introspect::plan(source, rules, scope).await?;
            plan.apply(&mut tree);
            self.vault.save_schema(connection, &tree)?;

            state.units = plan.units;
            state.cursor = 0;
            state.transition(Phase::Discovery)?;
            self.vault.save_onboarding(&state)?;
            info!(
                connection = %connection,
                units = state.units.len(),
                ignored = plan.ignored.len(),
                "Discovery started"
            );
        }

        let mut processed = Vec::new();
        while processed.len() < self.chunk_size && !state.discovery_finished() {
            let unit = state.units[state.cursor].clone();
            let tables = match introspect::discover_schema(source, rules, &unit).await {
                Ok(tables) => tables,
                Err(e) => {
                    warn!(
                        connection = %connection,
                        unit = %unit,
                        error = %e,
                        "Discovery unit failed; cursor unchanged"
                    );
                    return Err(e);
                }
            };
            let count = tables.iter().filter(|t| !t.ignored).count() as u64;

            let segments = unit.segments();
            tree.merge_tables(&segments[0], &segments[1], tables);
            tree.discovered_at = Some(Utc::now());
            self.vault.save_schema(connection, &tree)?;

            state.complete_unit(unit.clone(), count);
            self.vault.save_onboarding(&state)?;
            debug!(
                connection = %connection,
                unit = %unit,
                tables = count,
                cursor = state.cursor,
                "Discovery unit complete"
            );
            processed.push(unit);
        }

        if state.discovery_finished() {
            state.transition(Phase::Review)?;
            self.vault.save_onboarding(&state)?;
            info!(
                connection = %connection,
                tables = state.tables_discovered,
                "Discovery complete"
            );
        }

        Ok(ChunkReport::from_state(&state, processed))
    }

    /// Count reviewed tables; only valid in `review`.
    pub async fn record_review(&self, connection: &str, count: u64) -> DbResult<OnboardingState> {
        let _guard = self.lock(connection).await;
        let mut state = self.vault.load_onboarding(connection)?;
        if state.phase != Phase::Review {
            return Err(DbError::invalid_transition(state.phase, Phase::Review));
        }
        state.tables_reviewed += count;
        state.touch();
        self.vault.save_onboarding(&state)?;
        Ok(state)
    }

    /// `review -> domain_building`.
    pub async fn begin_domain_building(&self, connection: &str) -> DbResult<OnboardingState> {
        self.advance(connection, Phase::DomainBuilding).await
    }

    /// `domain_building -> complete`.
    pub async fn complete(&self, connection: &str) -> DbResult<OnboardingState> {
        self.advance(connection, Phase::Complete).await
    }

    /// Explicit transition to a curator-driven phase.
    ///
    /// `discovery` and `review` are only entered through discovery calls.
    pub async fn advance(&self, connection: &str, to: Phase) -> DbResult<OnboardingState> {
        let _guard = self.lock(connection).await;
        let mut state = self.vault.load_onboarding(connection)?;
        if matches!(to, Phase::Init | Phase::Discovery | Phase::Review) {
            return Err(DbError::invalid_transition(state.phase, to));
        }
        state.transition(to)?;
        self.vault.save_onboarding(&state)?;
        info!(connection = %connection, phase = %state.phase, "Onboarding advanced");
        Ok(state)
    }

    /// Back to `init` from any phase. The saved schema tree is kept.
    pub async fn reset(&self, connection: &str) -> DbResult<OnboardingState> {
        let _guard = self.lock(connection).await;
        let mut state = self.vault.load_onboarding(connection)?;
        let from = state.phase;
        state.reset();
        self.vault.save_onboarding(&state)?;
        info!(connection = %connection, from = %from, "Onboarding reset");
        Ok(state)
    }
}

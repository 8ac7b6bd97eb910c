//! Vault operations.
//!
//! - `introspect`: catalog discovery into the schema tree
//! - `ignore`: ignore rule parsing and matching
//! - `onboarding`: resumable onboarding state machine
//! - `sql_validator`: read-only enforcement and cost classification
//! - `explain`: plan-based row estimates
//! - `migrations`: one-time vault format upgrades

pub mod explain;
pub mod ignore;
pub mod introspect;
pub mod migrations;
pub mod onboarding;
pub mod sql_validator;

pub use ignore::{IgnoreRule, IgnoreRules, is_ignored};
pub use introspect::{DiscoveryPlan, DiscoveryScope, MetadataSource, discover, refresh};
pub use migrations::{Migration, MigrationRunner, builtin_migrations};
pub use onboarding::{ChunkReport, Onboarder};
pub use sql_validator::{SqlValidator, check_static, validate};

//! Data models for the schema vault.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod migration;
pub mod onboarding;
pub mod schema;
pub mod validation;

// Re-export commonly used types
pub use connection::{ConnectionSummary, DialectKind};
pub use migration::{FailedMigration, MigrationLedger, MigrationRecord, MigrationReport};
pub use onboarding::{OnboardingState, Phase};
pub use schema::{
    CatalogNode, CatalogPath, ColumnNode, Listed, NodeStatus, SchemaNode, SchemaTree, Scope,
    TableNode, TableType, TreeStats, TypeTag,
};
pub use validation::{
    CostClass, CostThresholds, MetricUnit, PlanMetric, StatementType, ValidationResult, Verdict,
};

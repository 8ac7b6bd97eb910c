//! SQL validation result models.

use crate::config::{DEFAULT_HIGH_COST_ROWS, DEFAULT_LOW_COST_ROWS};
use serde::{Deserialize, Serialize};

/// Outcome of validating one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allowed,
    Rejected,
    AllowedWithWarning,
}

/// Coarse bucket for a statement's estimated execution expense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CostClass {
    Low,
    Medium,
    High,
    Unknown,
}

/// Type of SQL statement detected by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    /// SELECT and other read-only queries (SELECT, WITH, SHOW, DESCRIBE, VALUES, EXPLAIN)
    Select,
    /// INSERT, UPDATE, DELETE, MERGE, REPLACE, UPSERT
    DmlWrite,
    /// CREATE, DROP, ALTER, TRUNCATE, RENAME
    Ddl,
    /// BEGIN, COMMIT, ROLLBACK, SAVEPOINT, RELEASE, START
    Transaction,
    /// CALL, EXECUTE, EXEC (stored procedures)
    ProcedureCall,
    /// GRANT, REVOKE, SET, LOCK, UNLOCK, VACUUM
    Administrative,
    Unknown,
}

/// What a plan-derived metric counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    Rows,
    Bytes,
}

/// Raw estimate extracted from an explain plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlanMetric {
    pub value: f64,
    pub unit: MetricUnit,
}

impl PlanMetric {
    pub fn rows(value: f64) -> Self {
        Self {
            value,
            unit: MetricUnit::Rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub verdict: Verdict,
    pub statement_type: StatementType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_keyword: Option<String>,
    /// Statement text around the rejected keyword
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    pub cost_class: CostClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<PlanMetric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ValidationResult {
    /// Passed the static stage; cost not yet estimated.
    pub fn allowed(statement_type: StatementType) -> Self {
        Self {
            verdict: Verdict::Allowed,
            statement_type,
            rejected_keyword: None,
            excerpt: None,
            cost_class: CostClass::Unknown,
            metric: None,
            warning: None,
        }
    }

    pub fn rejected(
        statement_type: StatementType,
        keyword: impl Into<String>,
        excerpt: impl Into<String>,
    ) -> Self {
        Self {
            verdict: Verdict::Rejected,
            rejected_keyword: Some(keyword.into()),
            excerpt: Some(excerpt.into()),
            ..Self::allowed(statement_type)
        }
    }

    /// Attach a cost estimate.
    pub fn with_cost(mut self, class: CostClass, metric: PlanMetric) -> Self {
        self.cost_class = class;
        self.metric = Some(metric);
        self
    }

    /// Degrade to `allowed_with_warning` with an unknown cost.
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.verdict = Verdict::AllowedWithWarning;
        self.cost_class = CostClass::Unknown;
        self.warning = Some(warning.into());
        self
    }

    pub fn is_rejected(&self) -> bool {
        self.verdict == Verdict::Rejected
    }
}

/// Global cost bucket thresholds on estimated rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostThresholds {
    /// Estimates below this are `low`
    pub low_below: f64,
    /// Estimates at or above this are `high`
    pub high_from: f64,
}

impl Default for CostThresholds {
    fn default() -> Self {
        Self {
            low_below: DEFAULT_LOW_COST_ROWS,
            high_from: DEFAULT_HIGH_COST_ROWS,
        }
    }
}

impl CostThresholds {
    pub fn classify(&self, metric: &PlanMetric) -> CostClass {
        if !metric.value.is_finite() || metric.value < 0.0 {
            CostClass::Unknown
        } else if metric.value < self.low_below {
            CostClass::Low
        } else if metric.value >= self.high_from {
            CostClass::High
        } else {
            CostClass::Medium
        }
    }

    /// Validate thresholds and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.low_below.is_finite() && self.high_from.is_finite()) {
            return Err("cost thresholds must be finite".to_string());
        }
        if self.low_below < 0.0 {
            return Err("low cost threshold cannot be negative".to_string());
        }
        if self.low_below > self.high_from {
            return Err(format!(
                "low cost threshold ({}) cannot exceed high cost threshold ({})",
                self.low_below, self.high_from
            ));
        }
        Ok(())
    }
}

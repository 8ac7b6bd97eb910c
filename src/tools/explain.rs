//! Plan-based cost estimation.
//!
//! Runs the dialect's explain statement and extracts an estimated row count
//! from the plan. Every failure here is reported as
//! `CostEstimationUnavailable`; callers downgrade it to a warning.

use crate::db::dialect::PlanCostRule;
use crate::db::{Connection, DbPool};
use crate::error::{DbError, DbResult};
use crate::models::PlanMetric;
use serde_json::Value;
use tracing::debug;

/// Raw explain output.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutput {
    Json(Value),
    Text(Vec<String>),
}

/// Run the explain statement for `sql`.
pub async fn fetch_plan(conn: &Connection, sql: &str) -> DbResult<PlanOutput> {
    let profile = conn.profile();
    let explain_sql = profile.explain(sql);
    let pool = conn.pool().await?;

    let plan = match (&pool, profile.plan_cost_rule) {
        (DbPool::Postgres(p), PlanCostRule::PostgresJson) => {
            let value = conn
                .bounded(
                    "EXPLAIN",
                    sqlx::query_scalar::<_, Value>(&explain_sql).fetch_one(p),
                )
                .await?;
            PlanOutput::Json(value)
        }
        (DbPool::MySql(p), _) => {
            let row = conn
                .bounded("EXPLAIN", sqlx::query(&explain_sql).fetch_one(p))
                .await?;
            let text = mysql::first_column_string(&row)?;
            let value = serde_json::from_str(&text)
                .map_err(|e| DbError::cost_unavailable(format!("Unreadable JSON plan: {}", e)))?;
            PlanOutput::Json(value)
        }
        (DbPool::Postgres(p), _) => {
            let rows = conn
                .bounded("EXPLAIN", sqlx::query(&explain_sql).fetch_all(p))
                .await?;
            PlanOutput::Text(postgres::text_lines(&rows)?)
        }
        (DbPool::SQLite(p), _) => {
            let rows = conn
                .bounded("EXPLAIN", sqlx::query(&explain_sql).fetch_all(p))
                .await?;
            PlanOutput::Text(sqlite::detail_lines(&rows)?)
        }
    };
    debug!(connection = %conn.name(), "Fetched query plan");
    Ok(plan)
}

mod postgres {
    use super::*;
    use sqlx::Row;
    use sqlx::postgres::PgRow;

    pub fn text_lines(rows: &[PgRow]) -> DbResult<Vec<String>> {
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(DbError::from))
            .collect()
    }
}

mod mysql {
    use super::*;
    use sqlx::Row;
    use sqlx::mysql::MySqlRow;

    /// The plan column may come back as VARBINARY depending on charset.
    pub fn first_column_string(row: &MySqlRow) -> DbResult<String> {
        match row.try_get::<String, _>(0) {
            Ok(s) => Ok(s),
            Err(_) => {
                let bytes: Vec<u8> = row.try_get(0)?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::Row;
    use sqlx::sqlite::SqliteRow;

    pub fn detail_lines(rows: &[SqliteRow]) -> DbResult<Vec<String>> {
        rows.iter()
            .map(|row| row.try_get::<String, _>("detail").map_err(DbError::from))
            .collect()
    }
}

/// Extract the estimated row count from a plan.
pub fn plan_metric(rule: PlanCostRule, plan: &PlanOutput) -> DbResult<PlanMetric> {
    let rows = match (rule, plan) {
        (PlanCostRule::PostgresJson, PlanOutput::Json(v)) => max_field(v, &["Plan Rows"]),
        (PlanCostRule::MySqlJson, PlanOutput::Json(v)) => {
            max_field(v, &["rows_examined_per_scan", "rows_produced_per_join"])
        }
        (PlanCostRule::TextRows, PlanOutput::Text(lines)) => max_text_rows(lines),
        (PlanCostRule::Unavailable, _) => {
            return Err(DbError::cost_unavailable(
                "This dialect's plans carry no row estimates",
            ));
        }
        _ => None,
    };

    rows.map(PlanMetric::rows)
        .ok_or_else(|| DbError::cost_unavailable("No row estimate found in plan"))
}

/// Run the explain statement and extract its metric.
///
/// Any failure, including a driver error or timeout, becomes
/// `CostEstimationUnavailable`.
pub async fn estimate(conn: &Connection, sql: &str) -> DbResult<PlanMetric> {
    let plan = fetch_plan(conn, sql).await.map_err(|e| match e {
        DbError::CostEstimationUnavailable { .. } => e,
        other => DbError::cost_unavailable(other.to_string()),
    })?;
    plan_metric(conn.profile().plan_cost_rule, &plan)
}

/// Largest numeric value under any of `keys`, anywhere in the document.
fn max_field(value: &Value, keys: &[&str]) -> Option<f64> {
    match value {
        Value::Object(map) => {
            let own = keys
                .iter()
                .filter_map(|k| map.get(*k))
                .filter_map(as_number);
            let nested = map.values().filter_map(|v| max_field(v, keys));
            own.chain(nested).reduce(f64::max)
        }
        Value::Array(items) => items
            .iter()
            .filter_map(|v| max_field(v, keys))
            .reduce(f64::max),
        _ => None,
    }
}

/// MySQL reports some estimates as strings (`"1.2e3"`).
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Largest `rows=N` across text plan lines.
fn max_text_rows(lines: &[String]) -> Option<f64> {
    lines
        .iter()
        .flat_map(|line| line.match_indices("rows=").map(move |(i, _)| &line[i + 5..]))
        .filter_map(|rest| {
            let end = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(rest.len());
            rest[..end].parse::<f64>().ok()
        })
        .reduce(f64::max)
}

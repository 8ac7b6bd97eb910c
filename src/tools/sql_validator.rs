//! Pre-execution SQL validation.
//!
//! Validation runs in two stages and stops at the first rejection:
//!
//! 1. A static stage tokenizes the statement with
//!    [sqlparser](https://docs.rs/sqlparser/) and rejects it if any
//!    denylisted keyword appears as a bare word. String literals, quoted
//!    identifiers and comments are separate tokens, so keywords inside them
//!    never match.
//! 2. A cost stage asks the database for a plan and buckets its estimated
//!    row count. A failure at this stage downgrades the result to
//!    `allowed_with_warning` with an `unknown` cost; it never rejects.

use crate::db::Connection;
use crate::db::dialect::DialectProfile;
use crate::error::{DbError, DbResult};
use crate::models::{CostClass, CostThresholds, PlanMetric, StatementType, ValidationResult};
use crate::tools::explain;
use sqlparser::tokenizer::{Token, Tokenizer};
use tracing::{debug, info, warn};

/// Maximum length of the excerpt returned with a rejection.
pub const EXCERPT_MAX_CHARS: usize = 120;

/// Validate statements against one set of cost thresholds.
#[derive(Debug, Clone, Default)]
pub struct SqlValidator {
    thresholds: CostThresholds,
}

impl SqlValidator {
    pub fn new(thresholds: CostThresholds) -> DbResult<Self> {
        thresholds.validate().map_err(DbError::invalid_input)?;
        Ok(Self { thresholds })
    }

    pub fn thresholds(&self) -> &CostThresholds {
        &self.thresholds
    }

    /// Run both stages against `conn`.
    ///
    /// A denylisted keyword is raised as `ValidationRejected`; cost problems
    /// only ever produce a warning on the returned result.
    pub async fn validate(&self, conn: &Connection, sql: &str) -> DbResult<ValidationResult> {
        let result = check_static(conn.profile(), sql)?;
        if result.is_rejected() {
            let keyword = result.rejected_keyword.unwrap_or_default();
            let excerpt = result.excerpt.unwrap_or_default();
            warn!(
                connection = %conn.name(),
                keyword = %keyword,
                "Statement rejected"
            );
            return Err(DbError::rejected(keyword, excerpt));
        }

        let estimate = explain::estimate(conn, sql).await;
        let result = self.apply_estimate(result, estimate);
        info!(
            connection = %conn.name(),
            statement_type = ?result.statement_type,
            cost = ?result.cost_class,
            verdict = ?result.verdict,
            "Statement validated"
        );
        Ok(result)
    }

    /// Fold a cost estimate into a statically allowed result.
    pub fn apply_estimate(
        &self,
        result: ValidationResult,
        estimate: DbResult<PlanMetric>,
    ) -> ValidationResult {
        match estimate {
            Ok(metric) => match self.thresholds.classify(&metric) {
                CostClass::Unknown => {
                    result.with_warning(format!("Unusable plan estimate: {}", metric.value))
                }
                class => result.with_cost(class, metric),
            },
            Err(e) => {
                debug!(error = %e, "Cost estimation unavailable");
                let reason = match e {
                    DbError::CostEstimationUnavailable { reason } => reason,
                    other => other.to_string(),
                };
                result.with_warning(format!("Cost estimation unavailable: {}", reason))
            }
        }
    }
}

/// Validate with the default cost thresholds.
pub async fn validate(conn: &Connection, sql: &str) -> DbResult<ValidationResult> {
    SqlValidator::default().validate(conn, sql).await
}

/// Static stage: statement type and denylist check, no database access.
///
/// A rejection is returned as data (`verdict = rejected`); empty or
/// untokenizable input is `InvalidInput`.
pub fn check_static(profile: &DialectProfile, sql: &str) -> DbResult<ValidationResult> {
    if sql.trim().is_empty() {
        return Err(DbError::invalid_input("Empty SQL statement"));
    }

    let tokens = Tokenizer::new(profile.sql_dialect, sql)
        .tokenize()
        .map_err(|e| DbError::invalid_input(format!("Failed to tokenize SQL: {}", e)))?;

    // Indexes of tokens that are not whitespace or comments
    let significant: Vec<usize> = tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| !matches!(t, Token::Whitespace(_)))
        .map(|(i, _)| i)
        .collect();
    if significant.is_empty() {
        return Err(DbError::invalid_input("SQL contains only comments"));
    }

    let statement_type = statement_type(&tokens, &significant);

    for (pos, &idx) in significant.iter().enumerate() {
        let Token::Word(word) = &tokens[idx] else {
            continue;
        };
        if word.quote_style.is_some() {
            continue;
        }
        let leading = pos == 0 || matches!(tokens[significant[pos - 1]], Token::SemiColon);
        if leading && rejects_leading(&word.value) {
            return Ok(ValidationResult::rejected(
                statement_type,
                word.value.to_uppercase(),
                excerpt(&tokens, idx),
            ));
        }
        if !profile.denies(&word.value) {
            continue;
        }
        // `schema.delete` is a qualified name, `replace(...)` a function call
        // unless it opens a statement (`COPY (SELECT ...) TO ...`)
        let after_period = pos > 0 && matches!(tokens[significant[pos - 1]], Token::Period);
        let before_paren = !leading
            && significant
                .get(pos + 1)
                .is_some_and(|&next| matches!(tokens[next], Token::LParen));
        if after_period || before_paren {
            continue;
        }

        let keyword = word.value.to_uppercase();
        return Ok(ValidationResult::rejected(
            statement_type,
            keyword,
            excerpt(&tokens, idx),
        ));
    }

    Ok(ValidationResult::allowed(statement_type))
}

/// Classify by the first significant keyword.
fn statement_type(tokens: &[Token], significant: &[usize]) -> StatementType {
    let words: Vec<String> = significant
        .iter()
        .filter_map(|&i| match &tokens[i] {
            Token::Word(w) if w.quote_style.is_none() => Some(w.value.to_uppercase()),
            _ => None,
        })
        .collect();

    let Some(first) = words.first() else {
        return StatementType::Unknown;
    };

    // Writable CTEs: `WITH x AS (...) DELETE ...`
    if first == "WITH" {
        let writes = words
            .iter()
            .any(|w| matches!(w.as_str(), "INSERT" | "UPDATE" | "DELETE" | "MERGE"));
        return if writes {
            StatementType::DmlWrite
        } else {
            StatementType::Select
        };
    }
    keyword_type(first)
}

/// Statement class opened by an upper-case keyword.
fn keyword_type(keyword: &str) -> StatementType {
    match keyword {
        "SELECT" | "VALUES" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" | "TABLE" => {
            StatementType::Select
        }
        "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "REPLACE" | "UPSERT" | "COPY" => {
            StatementType::DmlWrite
        }
        "CREATE" | "DROP" | "ALTER" | "TRUNCATE" | "RENAME" | "COMMENT" => StatementType::Ddl,
        "BEGIN" | "START" | "COMMIT" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" | "END" => {
            StatementType::Transaction
        }
        "CALL" | "EXEC" | "EXECUTE" | "PREPARE" | "DEALLOCATE" | "DO" => {
            StatementType::ProcedureCall
        }
        "GRANT" | "REVOKE" | "SET" | "USE" | "KILL" | "VACUUM" | "ANALYZE" | "LOCK"
        | "UNLOCK" | "FLUSH" | "PRAGMA" | "LOAD" | "UNLOAD" | "ATTACH" | "DETACH"
        | "OPTIMIZE" | "REINDEX" | "CLUSTER" | "REFRESH" | "LISTEN" | "NOTIFY" => {
            StatementType::Administrative
        }
        _ => StatementType::Unknown,
    }
}

/// A statement opened by this word is never read-only, whatever follows it.
fn rejects_leading(word: &str) -> bool {
    matches!(
        keyword_type(&word.to_uppercase()),
        StatementType::DmlWrite
            | StatementType::Ddl
            | StatementType::ProcedureCall
            | StatementType::Administrative
    )
}

/// Text around token `hit`, at most [`EXCERPT_MAX_CHARS`] characters.
fn excerpt(tokens: &[Token], hit: usize) -> String {
    let render = |ts: &[Token]| ts.iter().map(ToString::to_string).collect::<String>();
    let hit_text: String = tokens[hit].to_string().chars().take(EXCERPT_MAX_CHARS).collect();
    let room = EXCERPT_MAX_CHARS - hit_text.chars().count();
    let left = room / 2;
    let right = room - left;

    let before = render(&tokens[..hit]);
    let before_len = before.chars().count();
    let before: String = before.chars().skip(before_len.saturating_sub(left)).collect();
    let after: String = render(&tokens[hit + 1..]).chars().take(right).collect();

    let joined = format!("{}{}{}", before, hit_text, after);
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dialect::{MYSQL, POSTGRES, SQLITE};
    use crate::models::{MetricUnit, Verdict};

    fn rejected_keyword(profile: &DialectProfile, sql: &str) -> Option<String> {
        check_static(profile, sql).unwrap().rejected_keyword
    }

    #[test]
    fn test_select_allowed() {
        let result = check_static(&POSTGRES, "SELECT * FROM users").unwrap();
        assert_eq!(result.verdict, Verdict::Allowed);
        assert_eq!(result.statement_type, StatementType::Select);
    }

    #[test]
    fn test_drop_rejected() {
        let result = check_static(&POSTGRES, "DROP TABLE users").unwrap();
        assert!(result.is_rejected());
        assert_eq!(result.rejected_keyword.as_deref(), Some("DROP"));
        assert_eq!(result.statement_type, StatementType::Ddl);
        assert!(result.excerpt.unwrap().contains("DROP TABLE users"));
    }

    #[test]
    fn test_keyword_in_literal_allowed() {
        let sql = "SELECT * FROM users WHERE note = 'please DROP this'";
        let result = check_static(&POSTGRES, sql).unwrap();
        assert_eq!(result.verdict, Verdict::Allowed);
    }

    #[test]
    fn test_keyword_in_comment_or_quoted_identifier_allowed() {
        assert_eq!(
            rejected_keyword(&POSTGRES, "SELECT 1 -- DELETE later\n"),
            None
        );
        assert_eq!(
            rejected_keyword(&POSTGRES, "SELECT \"delete\" FROM t /* drop */"),
            None
        );
        assert_eq!(rejected_keyword(&MYSQL, "SELECT `update` FROM t"), None);
    }

    #[test]
    fn test_function_call_and_qualified_name_allowed() {
        assert_eq!(
            rejected_keyword(&MYSQL, "SELECT REPLACE(name, 'a', 'b') FROM t"),
            None
        );
        assert_eq!(rejected_keyword(&POSTGRES, "SELECT t.update FROM t"), None);
    }

    #[test]
    fn test_stacked_statement_rejected() {
        assert_eq!(
            rejected_keyword(&POSTGRES, "SELECT 1; delete from users"),
            Some("DELETE".to_string())
        );
    }

    #[test]
    fn test_writable_cte_rejected() {
        let result = check_static(
            &POSTGRES,
            "WITH gone AS (DELETE FROM users RETURNING id) SELECT * FROM gone",
        )
        .unwrap();
        assert!(result.is_rejected());
        assert_eq!(result.statement_type, StatementType::DmlWrite);
    }

    #[test]
    fn test_dialect_specific_denylist() {
        assert_eq!(
            rejected_keyword(&SQLITE, "PRAGMA table_info(users)"),
            Some("PRAGMA".to_string())
        );
        assert_eq!(
            rejected_keyword(&SQLITE, "ATTACH DATABASE 'x.db' AS x"),
            Some("ATTACH".to_string())
        );
        assert_eq!(
            rejected_keyword(&MYSQL, "SELECT * FROM t INTO OUTFILE '/tmp/x'"),
            Some("INTO".to_string())
        );
        assert_eq!(
            rejected_keyword(&POSTGRES, "COPY users TO '/tmp/u.csv'"),
            Some("COPY".to_string())
        );
    }

    #[test]
    fn test_statement_keyword_before_paren_rejected() {
        for (sql, keyword) in [
            ("COPY (SELECT * FROM users) TO PROGRAM 'curl http://x'", "COPY"),
            ("COPY (SELECT 1) TO '/tmp/x.csv'", "COPY"),
            ("VACUUM (FULL) users", "VACUUM"),
            ("REINDEX (VERBOSE) TABLE users", "REINDEX"),
            ("CLUSTER (VERBOSE) t", "CLUSTER"),
            ("SELECT 1; copy (select 2) to '/tmp/y'", "COPY"),
        ] {
            assert_eq!(
                rejected_keyword(&POSTGRES, sql),
                Some(keyword.to_string()),
                "{}",
                sql
            );
        }
        assert_eq!(
            rejected_keyword(&SQLITE, "REPLACE INTO t (id) VALUES (1)"),
            Some("REPLACE".to_string())
        );
    }

    #[test]
    fn test_procedural_block_rejected() {
        let result = check_static(
            &POSTGRES,
            "DO $$ BEGIN EXECUTE 'DROP TABLE users'; END $$",
        )
        .unwrap();
        assert!(result.is_rejected());
        assert_eq!(result.rejected_keyword.as_deref(), Some("DO"));
        assert_eq!(result.statement_type, StatementType::ProcedureCall);
    }

    #[test]
    fn test_administrative_statements_rejected() {
        assert_eq!(
            rejected_keyword(&POSTGRES, "LOCK TABLE users IN ACCESS EXCLUSIVE MODE"),
            Some("LOCK".to_string())
        );
        assert_eq!(
            rejected_keyword(&POSTGRES, "COMMENT ON TABLE users IS 'x'"),
            Some("COMMENT".to_string())
        );
        assert_eq!(
            rejected_keyword(&POSTGRES, "SET search_path TO evil"),
            Some("SET".to_string())
        );
        assert_eq!(
            rejected_keyword(&MYSQL, "LOCK TABLES users WRITE"),
            Some("LOCK".to_string())
        );
        assert_eq!(
            rejected_keyword(&SQLITE, "ATTACH 'other.db' AS other"),
            Some("ATTACH".to_string())
        );
    }

    #[test]
    fn test_comment_and_lock_columns_allowed() {
        assert_eq!(rejected_keyword(&POSTGRES, "SELECT comment FROM posts"), None);
        assert_eq!(
            rejected_keyword(&MYSQL, "SELECT id, lock FROM jobs WHERE lock = 0"),
            None
        );
    }

    #[test]
    fn test_statement_types() {
        let st = |sql| check_static(&POSTGRES, sql).unwrap().statement_type;
        assert_eq!(st("WITH x AS (SELECT 1) SELECT * FROM x"), StatementType::Select);
        assert_eq!(st("  (SELECT 1)"), StatementType::Select);
        assert_eq!(st("COMMIT"), StatementType::Transaction);
        assert_eq!(st("SET search_path TO x"), StatementType::Administrative);
        assert_eq!(st("FOO BAR"), StatementType::Unknown);
    }

    #[test]
    fn test_empty_input_invalid() {
        assert!(matches!(
            check_static(&POSTGRES, "   "),
            Err(DbError::InvalidInput { .. })
        ));
        assert!(matches!(
            check_static(&POSTGRES, "-- nothing here"),
            Err(DbError::InvalidInput { .. })
        ));
        assert!(matches!(
            check_static(&POSTGRES, "SELECT 'unterminated"),
            Err(DbError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_excerpt_bounded() {
        let long_prefix = "a, ".repeat(200);
        let sql = format!("SELECT {} b FROM t; DROP TABLE t; SELECT {} c", long_prefix, long_prefix);
        let result = check_static(&POSTGRES, &sql).unwrap();
        let excerpt = result.excerpt.unwrap();
        assert!(excerpt.chars().count() <= EXCERPT_MAX_CHARS);
        assert!(excerpt.contains("DROP"));
    }

    #[test]
    fn test_apply_estimate_buckets() {
        let validator = SqlValidator::default();
        let base = ValidationResult::allowed(StatementType::Select);

        let low = validator.apply_estimate(base.clone(), Ok(PlanMetric::rows(10.0)));
        assert_eq!(low.cost_class, CostClass::Low);
        assert_eq!(low.verdict, Verdict::Allowed);
        assert_eq!(low.metric.unwrap().unit, MetricUnit::Rows);

        let medium = validator.apply_estimate(base.clone(), Ok(PlanMetric::rows(5e8)));
        assert_eq!(medium.cost_class, CostClass::Medium);

        let high = validator.apply_estimate(base.clone(), Ok(PlanMetric::rows(1e10)));
        assert_eq!(high.cost_class, CostClass::High);
    }

    #[test]
    fn test_apply_estimate_failure_warns() {
        let validator = SqlValidator::default();
        let base = ValidationResult::allowed(StatementType::Select);
        let result =
            validator.apply_estimate(base, Err(DbError::cost_unavailable("unfamiliar plan")));
        assert_eq!(result.verdict, Verdict::AllowedWithWarning);
        assert_eq!(result.cost_class, CostClass::Unknown);
        assert!(result.warning.unwrap().contains("unfamiliar plan"));
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let thresholds = CostThresholds {
            low_below: 1e10,
            high_from: 1e8,
        };
        assert!(SqlValidator::new(thresholds).is_err());
    }
}

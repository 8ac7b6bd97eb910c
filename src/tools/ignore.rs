//! Ignore rules for discovery.
//!
//! One rule per line: `[!][scope:]pattern`. The scope is `catalog:`,
//! `schema:` or `table:` (default `table`), `!` re-includes, `#` starts a
//! comment. Patterns are dot-separated; `*` and `?` stay inside one segment
//! and `**` spans whole segments. A pattern shorter than its scope's depth is
//! anchored on the right, so `temp_*` at table scope matches a table named
//! `temp_x` in any schema.
//!
//! Rules are evaluated in file order and the last match wins. A rule only
//! applies at its own scope; an ignored catalog or schema hides everything
//! below it.

use crate::error::{DbError, DbResult};
use crate::models::{CatalogPath, Scope};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Scopes a rule can target, shallowest first.
const RULE_SCOPES: [Scope; 3] = [Scope::Catalog, Scope::Schema, Scope::Table];

/// Replaces `/` inside names and patterns so it cannot act as a segment
/// separator; a literal `/` in a pattern still matches a `/` in a name.
const SEPARATOR_STANDIN: &str = "\u{1f}";

/// One parsed rule line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreRule {
    pub scope: Scope,
    /// `!` prefix: an include override.
    pub negated: bool,
    pub pattern: String,
}

impl IgnoreRule {
    /// Parse one non-comment line.
    pub fn parse(line: &str) -> DbResult<Self> {
        let (negated, rest) = match line.strip_prefix('!') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, line),
        };

        let (scope, pattern) = match rest.split_once(':') {
            Some(("catalog", p)) => (Scope::Catalog, p),
            Some(("schema", p)) => (Scope::Schema, p),
            Some(("table", p)) => (Scope::Table, p),
            _ => (Scope::Table, rest),
        };
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(DbError::invalid_input(format!(
                "Empty ignore pattern in rule '{}'",
                line
            )));
        }

        let segments = pattern.split('.').count();
        if !pattern.contains("**") && segments > scope.depth() {
            return Err(DbError::invalid_input(format!(
                "Ignore pattern '{}' has {} segments, more than a {} path",
                pattern, segments, scope
            )));
        }

        Ok(Self {
            scope,
            negated,
            pattern: pattern.to_string(),
        })
    }

    /// Glob over `/`-joined path segments.
    fn glob(&self) -> String {
        let segments: Vec<String> = self
            .pattern
            .split('.')
            .map(|s| s.replace('/', SEPARATOR_STANDIN))
            .collect();
        let joined = segments.join("/");
        if !segments.iter().any(|s| s == "**") && segments.len() < self.scope.depth() {
            format!("**/{}", joined)
        } else {
            joined
        }
    }
}

#[derive(Debug, Clone)]
struct ScopeSet {
    globs: GlobSet,
    /// Polarity of each glob, in rule order
    negated: Vec<bool>,
}

impl ScopeSet {
    fn build(rules: &[&IgnoreRule]) -> DbResult<Self> {
        let mut builder = GlobSetBuilder::new();
        for rule in rules {
            let glob = GlobBuilder::new(&rule.glob())
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    DbError::invalid_input(format!(
                        "Invalid ignore pattern '{}': {}",
                        rule.pattern, e
                    ))
                })?;
            builder.add(glob);
        }
        let globs = builder
            .build()
            .map_err(|e| DbError::invalid_input(format!("Invalid ignore rules: {}", e)))?;
        Ok(Self {
            globs,
            negated: rules.iter().map(|r| r.negated).collect(),
        })
    }

    /// Verdict of the last matching rule, if any.
    fn verdict(&self, candidate: &str) -> Option<bool> {
        self.globs
            .matches(candidate)
            .into_iter()
            .max()
            .map(|idx| !self.negated[idx])
    }
}

/// Compiled, ordered rule list for one connection.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    rules: Vec<IgnoreRule>,
    by_scope: Vec<ScopeSet>,
}

impl IgnoreRules {
    /// No rules: nothing is ignored.
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            by_scope: Vec::new(),
        }
    }

    /// Parse an ignore file.
    pub fn parse(text: &str) -> DbResult<Self> {
        let mut rules = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let rule = IgnoreRule::parse(line).map_err(|e| {
                DbError::invalid_input(format!("ignore rules line {}: {}", idx + 1, e))
            })?;
            rules.push(rule);
        }
        Self::from_rules(rules)
    }

    pub fn from_patterns<I, S>(patterns: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = patterns
            .into_iter()
            .map(|p| IgnoreRule::parse(p.as_ref().trim()))
            .collect::<DbResult<Vec<_>>>()?;
        Self::from_rules(rules)
    }

    pub fn from_rules(rules: Vec<IgnoreRule>) -> DbResult<Self> {
        let by_scope = RULE_SCOPES
            .iter()
            .map(|scope| {
                let scoped: Vec<&IgnoreRule> =
                    rules.iter().filter(|r| r.scope == *scope).collect();
                ScopeSet::build(&scoped)
            })
            .collect::<DbResult<Vec<_>>>()?;
        Ok(Self { rules, by_scope })
    }

    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `path` is excluded, checking its ancestors first.
    ///
    /// Column paths follow their table.
    pub fn is_ignored(&self, path: &CatalogPath) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        let segments = path.segments();
        let levels = segments.len().min(RULE_SCOPES.len());

        (1..=levels).any(|depth| {
            let candidate = segments[..depth]
                .iter()
                .map(|s| s.replace('/', SEPARATOR_STANDIN))
                .collect::<Vec<_>>()
                .join("/");
            self.by_scope
                .get(depth - 1)
                .and_then(|set| set.verdict(&candidate))
                .unwrap_or(false)
        })
    }
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::empty()
    }
}

/// Free-function form of [`IgnoreRules::is_ignored`].
pub fn is_ignored(path: &CatalogPath, rules: &IgnoreRules) -> bool {
    rules.is_ignored(path)
}

//! Schema tree data models.
//!
//! The vault describes a connection as a hierarchy of
//! `Catalog -> Schema -> Table -> Column` nodes. Each node carries an optional
//! curated description, the ignore verdict taken at discovery time and a
//! status (`ok | partial | stale`) so that partial results and vanished
//! objects are surfaced instead of raised or silently dropped.

use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Level of a node in the schema tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Catalog,
    Schema,
    Table,
    Column,
}

impl Scope {
    /// Number of path segments addressing a node of this scope.
    pub fn depth(&self) -> usize {
        match self {
            Self::Catalog => 1,
            Self::Schema => 2,
            Self::Table => 3,
            Self::Column => 4,
        }
    }

    fn from_depth(depth: usize) -> Option<Self> {
        match depth {
            1 => Some(Self::Catalog),
            2 => Some(Self::Schema),
            3 => Some(Self::Table),
            4 => Some(Self::Column),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Catalog => write!(f, "catalog"),
            Self::Schema => write!(f, "schema"),
            Self::Table => write!(f, "table"),
            Self::Column => write!(f, "column"),
        }
    }
}

/// Fully qualified path of a node (`catalog[.schema[.table[.column]]]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CatalogPath {
    segments: Vec<String>,
}

impl CatalogPath {
    pub fn catalog(catalog: impl Into<String>) -> Self {
        Self {
            segments: vec![catalog.into()],
        }
    }

    pub fn schema(catalog: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            segments: vec![catalog.into(), schema.into()],
        }
    }

    pub fn table(
        catalog: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            segments: vec![catalog.into(), schema.into(), table.into()],
        }
    }

    pub fn column(
        catalog: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            segments: vec![catalog.into(), schema.into(), table.into(), column.into()],
        }
    }

    pub fn scope(&self) -> Scope {
        // Constructors and FromStr only build 1..=4 segments.
        Scope::from_depth(self.segments.len()).unwrap_or(Scope::Column)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Name of the node this path addresses.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// The enclosing node's path, `None` for a catalog.
    pub fn parent(&self) -> Option<CatalogPath> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Ancestors from the catalog down, excluding the path itself.
    pub fn ancestors(&self) -> Vec<CatalogPath> {
        (1..self.segments.len())
            .map(|len| Self {
                segments: self.segments[..len].to_vec(),
            })
            .collect()
    }

    /// Extend this path by one level.
    pub fn child(&self, name: impl Into<String>) -> CatalogPath {
        let mut segments = self.segments.clone();
        segments.push(name.into());
        Self { segments }
    }
}

impl std::fmt::Display for CatalogPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl FromStr for CatalogPath {
    type Err = DbError;

    fn from_str(s: &str) -> DbResult<Self> {
        let segments: Vec<String> = s.split('.').map(|p| p.trim().to_string()).collect();
        if segments.iter().any(String::is_empty) || Scope::from_depth(segments.len()).is_none()
        {
            return Err(DbError::invalid_input(format!(
                "Invalid path '{}': expected catalog[.schema[.table[.column]]]",
                s
            )));
        }
        Ok(Self { segments })
    }
}

impl From<CatalogPath> for String {
    fn from(path: CatalogPath) -> Self {
        path.to_string()
    }
}

impl TryFrom<String> for CatalogPath {
    type Error = DbError;

    fn try_from(value: String) -> DbResult<Self> {
        value.parse()
    }
}

/// Discovery status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Ok,
    /// Detail could not be fetched; children are whatever was known before
    Partial,
    /// Missing from the latest scan; kept for curators
    Stale,
}

/// Normalized column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Date,
    Time,
    Timestamp,
    Other,
}

/// Type of database table object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    #[default]
    Table,
    View,
    MaterializedView,
    SystemTable,
    TemporaryTable,
}

impl TableType {
    /// Parse table type from database-specific string.
    pub fn parse(s: &str) -> Self {
        let lower = s.to_lowercase();
        match lower.as_str() {
            "table" | "base table" => Self::Table,
            "view" => Self::View,
            "materialized view" | "matview" => Self::MaterializedView,
            "system table" | "system view" => Self::SystemTable,
            "local temporary" | "temporary" | "temp" => Self::TemporaryTable,
            _ => Self::Table,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnNode {
    pub name: String,
    /// Raw database type (e.g., `varchar(30)`, `bigint unsigned`)
    pub data_type: String,
    pub type_tag: TypeTag,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: NodeStatus,
}

impl ColumnNode {
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        type_tag: TypeTag,
        nullable: bool,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            type_tag,
            nullable,
            description: None,
            status: NodeStatus::Ok,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableNode {
    pub name: String,
    #[serde(default)]
    pub table_type: TableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default)]
    pub status: NodeStatus,
    /// Reason for a `partial` status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnNode>,
}

impl TableNode {
    pub fn new(name: impl Into<String>, table_type: TableType) -> Self {
        Self {
            name: name.into(),
            table_type,
            description: None,
            ignored: false,
            status: NodeStatus::Ok,
            note: None,
            columns: Vec::new(),
        }
    }

    /// An ignored table, known by name only.
    pub fn name_only(name: impl Into<String>) -> Self {
        Self {
            ignored: true,
            ..Self::new(name, TableType::Table)
        }
    }

    /// Record a failed detail fetch on this node.
    pub fn mark_partial(&mut self, reason: impl Into<String>) {
        self.status = NodeStatus::Partial;
        self.note = Some(reason.into());
    }

    pub fn with_columns(mut self, columns: Vec<ColumnNode>) -> Self {
        self.columns = columns;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schemas: Vec<SchemaNode>,
}

/// A name reported by an enumeration step together with its ignore verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listed {
    pub name: String,
    pub ignored: bool,
}

impl Listed {
    pub fn new(name: impl Into<String>, ignored: bool) -> Self {
        Self {
            name: name.into(),
            ignored,
        }
    }
}

/// Structural operations shared by every node level for merging.
trait MergeNode {
    fn named(name: &str) -> Self;
    fn name(&self) -> &str;
    fn status_mut(&mut self) -> &mut NodeStatus;
    fn set_ignored(&mut self, ignored: bool);
}

macro_rules! impl_merge_node {
    ($node:ty, $children:ident) => {
        impl MergeNode for $node {
            fn named(name: &str) -> Self {
                Self {
                    name: name.to_string(),
                    description: None,
                    ignored: false,
                    status: NodeStatus::Ok,
                    $children: Vec::new(),
                }
            }

            fn name(&self) -> &str {
                &self.name
            }

            fn status_mut(&mut self) -> &mut NodeStatus {
                &mut self.status
            }

            fn set_ignored(&mut self, ignored: bool) {
                self.ignored = ignored;
                if ignored {
                    self.$children.clear();
                }
            }
        }
    };
}

impl_merge_node!(CatalogNode, schemas);
impl_merge_node!(SchemaNode, tables);

/// Upsert listed names; when the listing is exhaustive, unlisted nodes become stale.
fn merge_listing<N: MergeNode>(nodes: &mut Vec<N>, listed: &[Listed], exhaustive: bool) {
    for entry in listed {
        match nodes.iter_mut().find(|n| n.name() == entry.name) {
            Some(node) => {
                node.set_ignored(entry.ignored);
                let status = node.status_mut();
                if *status == NodeStatus::Stale {
                    *status = NodeStatus::Ok;
                }
            }
            None => {
                let mut node = N::named(&entry.name);
                node.set_ignored(entry.ignored);
                nodes.push(node);
            }
        }
    }

    if exhaustive {
        for node in nodes.iter_mut() {
            if !listed.iter().any(|l| l.name == node.name()) {
                *node.status_mut() = NodeStatus::Stale;
            }
        }
    }

    nodes.sort_by(|a, b| a.name().cmp(b.name()));
}

/// Counts over the whole tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub catalogs: usize,
    pub schemas: usize,
    pub tables: usize,
    pub columns: usize,
    pub ignored: usize,
    pub partial: usize,
    pub stale: usize,
}

/// The persisted description of one connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaTree {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub catalogs: Vec<CatalogNode>,
}

impl SchemaTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.catalogs.is_empty()
    }

    pub fn catalog(&self, name: &str) -> Option<&CatalogNode> {
        self.catalogs.iter().find(|c| c.name == name)
    }

    pub fn schema(&self, catalog: &str, schema: &str) -> Option<&SchemaNode> {
        self.catalog(catalog)?
            .schemas
            .iter()
            .find(|s| s.name == schema)
    }

    pub fn table(&self, catalog: &str, schema: &str, table: &str) -> Option<&TableNode> {
        self.schema(catalog, schema)?
            .tables
            .iter()
            .find(|t| t.name == table)
    }

    fn schema_mut(&mut self, catalog: &str, schema: &str) -> Option<&mut SchemaNode> {
        self.catalogs
            .iter_mut()
            .find(|c| c.name == catalog)?
            .schemas
            .iter_mut()
            .find(|s| s.name == schema)
    }

    /// Merge a catalog enumeration.
    pub fn merge_catalogs(&mut self, listed: &[Listed], exhaustive: bool) {
        merge_listing(&mut self.catalogs, listed, exhaustive);
    }

    /// Merge a schema enumeration for one catalog, creating the catalog if needed.
    pub fn merge_schemas(&mut self, catalog: &str, listed: &[Listed], exhaustive: bool) {
        if self.catalog(catalog).is_none() {
            self.merge_catalogs(&[Listed::new(catalog, false)], false);
        }
        if let Some(node) = self.catalogs.iter_mut().find(|c| c.name == catalog) {
            merge_listing(&mut node.schemas, listed, exhaustive);
        }
    }

    /// Merge the scanned tables of one schema.
    ///
    /// Existing descriptions are kept, tables and columns missing from the scan
    /// become stale, and a partial scan keeps the previously known columns.
    pub fn merge_tables(&mut self, catalog: &str, schema: &str, scanned: Vec<TableNode>) {
        if self.schema(catalog, schema).is_none() {
            self.merge_schemas(catalog, &[Listed::new(schema, false)], false);
        }
        let Some(node) = self.schema_mut(catalog, schema) else {
            return;
        };

        let mut merged = Vec::with_capacity(scanned.len());
        let mut previous = std::mem::take(&mut node.tables);

        for mut table in scanned {
            if let Some(pos) = previous.iter().position(|t| t.name == table.name) {
                let old = previous.swap_remove(pos);
                table.description = old.description;
                if table.ignored {
                    table.columns.clear();
                } else if table.status == NodeStatus::Partial {
                    table.columns = old.columns;
                } else {
                    table.columns = merge_columns(old.columns, table.columns);
                }
            }
            merged.push(table);
        }

        for mut vanished in previous {
            vanished.status = NodeStatus::Stale;
            merged.push(vanished);
        }

        merged.sort_by(|a, b| a.name.cmp(&b.name));
        node.tables = merged;
    }

    /// Set the description of the node at `path`.
    pub fn set_description(&mut self, path: &CatalogPath, text: Option<String>) -> DbResult<()> {
        let not_found = || DbError::schema("Node not found in schema tree", path.to_string());
        let segs = path.segments();

        let catalog = self
            .catalogs
            .iter_mut()
            .find(|c| c.name == segs[0])
            .ok_or_else(not_found)?;
        if segs.len() == 1 {
            catalog.description = text;
            return Ok(());
        }

        let schema = catalog
            .schemas
            .iter_mut()
            .find(|s| s.name == segs[1])
            .ok_or_else(not_found)?;
        if segs.len() == 2 {
            schema.description = text;
            return Ok(());
        }

        let table = schema
            .tables
            .iter_mut()
            .find(|t| t.name == segs[2])
            .ok_or_else(not_found)?;
        if segs.len() == 3 {
            table.description = text;
            return Ok(());
        }

        let column = table
            .columns
            .iter_mut()
            .find(|c| c.name == segs[3])
            .ok_or_else(not_found)?;
        column.description = text;
        Ok(())
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats::default();
        let mut tally = |ignored: bool, status: NodeStatus| {
            if ignored {
                stats.ignored += 1;
            }
            match status {
                NodeStatus::Ok => {}
                NodeStatus::Partial => stats.partial += 1,
                NodeStatus::Stale => stats.stale += 1,
            }
        };

        let mut counts = (0, 0, 0, 0);
        for catalog in &self.catalogs {
            counts.0 += 1;
            tally(catalog.ignored, catalog.status);
            for schema in &catalog.schemas {
                counts.1 += 1;
                tally(schema.ignored, schema.status);
                for table in &schema.tables {
                    counts.2 += 1;
                    tally(table.ignored, table.status);
                    for column in &table.columns {
                        counts.3 += 1;
                        tally(false, column.status);
                    }
                }
            }
        }

        stats.catalogs = counts.0;
        stats.schemas = counts.1;
        stats.tables = counts.2;
        stats.columns = counts.3;
        stats
    }
}

fn merge_columns(previous: Vec<ColumnNode>, scanned: Vec<ColumnNode>) -> Vec<ColumnNode> {
    let mut previous = previous;
    let mut merged: Vec<ColumnNode> = scanned
        .into_iter()
        .map(|mut column| {
            if let Some(pos) = previous.iter().position(|c| c.name == column.name) {
                column.description = previous.swap_remove(pos).description;
            }
            column
        })
        .collect();

    // Columns keep their ordinal order; vanished ones trail.
    for mut vanished in previous {
        vanished.status = NodeStatus::Stale;
        merged.push(vanished);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listed(names: &[&str]) -> Vec<Listed> {
        names.iter().map(|n| Listed::new(*n, false)).collect()
    }

    fn users_table() -> TableNode {
        TableNode::new("users", TableType::Table).with_columns(vec![
            ColumnNode::new("id", "integer", TypeTag::Integer, false),
            ColumnNode::new("email", "text", TypeTag::Text, true),
        ])
    }

    #[test]
    fn test_path_parse_and_scope() {
        let path: CatalogPath = "db.public.users.id".parse().unwrap();
        assert_eq!(path.scope(), Scope::Column);
        assert_eq!(path.name(), "id");
        assert_eq!(path.parent().unwrap().to_string(), "db.public.users");
        assert_eq!(
            path.ancestors()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec!["db", "db.public", "db.public.users"]
        );
        assert!("".parse::<CatalogPath>().is_err());
        assert!("a..b".parse::<CatalogPath>().is_err());
        assert!("a.b.c.d.e".parse::<CatalogPath>().is_err());
    }

    #[test]
    fn test_path_serializes_as_dotted_string() {
        let path = CatalogPath::schema("db", "public");
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"db.public\"");
        let back: CatalogPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn test_table_type_parse() {
        assert_eq!(TableType::parse("BASE TABLE"), TableType::Table);
        assert_eq!(TableType::parse("VIEW"), TableType::View);
        assert_eq!(TableType::parse("something else"), TableType::Table);
    }

    #[test]
    fn test_merge_keeps_descriptions_and_marks_stale() {
        let mut tree = SchemaTree::new();
        tree.merge_catalogs(&listed(&["db"]), true);
        tree.merge_schemas("db", &listed(&["public", "legacy"]), true);
        tree.merge_tables("db", "public", vec![users_table()]);
        tree.set_description(&CatalogPath::table("db", "public", "users"), Some("People".into()))
            .unwrap();
        tree.set_description(
            &CatalogPath::column("db", "public", "users", "email"),
            Some("Login".into()),
        )
        .unwrap();

        // Re-scan: legacy schema gone, email column dropped, orders added.
        tree.merge_schemas("db", &listed(&["public"]), true);
        let rescanned = TableNode::new("users", TableType::Table).with_columns(vec![
            ColumnNode::new("id", "integer", TypeTag::Integer, false),
        ]);
        tree.merge_tables(
            "db",
            "public",
            vec![rescanned, TableNode::new("orders", TableType::Table)],
        );

        assert_eq!(tree.schema("db", "legacy").unwrap().status, NodeStatus::Stale);
        let users = tree.table("db", "public", "users").unwrap();
        assert_eq!(users.description.as_deref(), Some("People"));
        let email = users.columns.iter().find(|c| c.name == "email").unwrap();
        assert_eq!(email.status, NodeStatus::Stale);
        assert_eq!(email.description.as_deref(), Some("Login"));
        assert!(tree.table("db", "public", "orders").is_some());
    }

    #[test]
    fn test_merge_revives_stale_nodes() {
        let mut tree = SchemaTree::new();
        tree.merge_schemas("db", &listed(&["a", "b"]), true);
        tree.merge_schemas("db", &listed(&["a"]), true);
        assert_eq!(tree.schema("db", "b").unwrap().status, NodeStatus::Stale);
        tree.merge_schemas("db", &listed(&["a", "b"]), true);
        assert_eq!(tree.schema("db", "b").unwrap().status, NodeStatus::Ok);
    }

    #[test]
    fn test_non_exhaustive_listing_leaves_others() {
        let mut tree = SchemaTree::new();
        tree.merge_schemas("db", &listed(&["a", "b"]), true);
        tree.merge_schemas("db", &listed(&["a"]), false);
        assert_eq!(tree.schema("db", "b").unwrap().status, NodeStatus::Ok);
    }

    #[test]
    fn test_ignored_nodes_drop_children() {
        let mut tree = SchemaTree::new();
        tree.merge_schemas("db", &listed(&["staging"]), true);
        tree.merge_tables("db", "staging", vec![users_table()]);
        assert_eq!(tree.schema("db", "staging").unwrap().tables.len(), 1);

        tree.merge_schemas("db", &[Listed::new("staging", true)], true);
        let staging = tree.schema("db", "staging").unwrap();
        assert!(staging.ignored);
        assert!(staging.tables.is_empty());
    }

    #[test]
    fn test_partial_scan_keeps_known_columns() {
        let mut tree = SchemaTree::new();
        tree.merge_tables("db", "public", vec![users_table()]);

        let mut partial = TableNode::new("users", TableType::Table);
        partial.mark_partial("permission denied");
        tree.merge_tables("db", "public", vec![partial]);

        let users = tree.table("db", "public", "users").unwrap();
        assert_eq!(users.status, NodeStatus::Partial);
        assert_eq!(users.note.as_deref(), Some("permission denied"));
        assert_eq!(users.columns.len(), 2);
    }

    #[test]
    fn test_set_description_unknown_path() {
        let mut tree = SchemaTree::new();
        let err = tree
            .set_description(&CatalogPath::table("db", "x", "y"), Some("z".into()))
            .unwrap_err();
        assert!(matches!(err, DbError::Schema { .. }));
    }

    #[test]
    fn test_stats() {
        let mut tree = SchemaTree::new();
        tree.merge_schemas("db", &[Listed::new("public", false), Listed::new("tmp", true)], true);
        let mut broken = TableNode::new("broken", TableType::View);
        broken.mark_partial("no privilege");
        tree.merge_tables("db", "public", vec![users_table(), broken]);

        let stats = tree.stats();
        assert_eq!(stats.catalogs, 1);
        assert_eq!(stats.schemas, 2);
        assert_eq!(stats.tables, 2);
        assert_eq!(stats.columns, 2);
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.partial, 1);
        assert_eq!(stats.stale, 0);
    }
}

//! Schema discovery.
//!
//! Discovery runs in two phases. Planning enumerates catalogs and schemas,
//! filtering each level through the ignore rules before descending, and
//! yields an ordered list of schema units. Each unit is then enumerated
//! table by table with column details fetched concurrently; a table whose
//! details cannot be read is kept with `status = partial` instead of failing
//! the unit.

use crate::error::{DbError, DbResult};
use crate::models::{CatalogPath, ColumnNode, Listed, SchemaTree, TableNode};
use crate::tools::ignore::IgnoreRules;
use chrono::Utc;
use futures_util::{StreamExt, TryStreamExt, stream};
use std::future::Future;
use tracing::{debug, info, warn};

/// Read access to a database's catalog metadata.
///
/// Implemented by [`crate::db::Connection`]; tests substitute in-memory sources.
pub trait MetadataSource: Send + Sync {
    fn list_catalogs(&self) -> impl Future<Output = DbResult<Vec<String>>> + Send;

    fn list_schemas(&self, catalog: &str) -> impl Future<Output = DbResult<Vec<String>>> + Send;

    /// Tables and views of one schema, without columns.
    fn list_tables(
        &self,
        catalog: &str,
        schema: &str,
    ) -> impl Future<Output = DbResult<Vec<TableNode>>> + Send;

    fn list_columns(
        &self,
        catalog: &str,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = DbResult<Vec<ColumnNode>>> + Send;

    /// Schema used by [`DiscoveryScope::DefaultSchema`].
    fn default_schema(&self) -> Option<String>;

    /// Maximum number of metadata calls in flight.
    fn concurrency(&self) -> usize;
}

/// What part of the database a discovery run covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DiscoveryScope {
    #[default]
    All,
    Catalog(String),
    Schema { catalog: String, schema: String },
    DefaultSchema,
}

/// Result of the enumeration phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryPlan {
    /// Non-ignored schema units, in processing order
    pub units: Vec<CatalogPath>,
    /// Ignored catalogs and schemas, recorded by name only
    pub ignored: Vec<CatalogPath>,
    pub catalogs: Vec<Listed>,
    pub schemas: Vec<(String, Vec<Listed>)>,
    /// The catalog listing covers every catalog
    pub catalogs_exhaustive: bool,
    /// Each schema listing covers every schema of its catalog
    pub schemas_exhaustive: bool,
}

impl DiscoveryPlan {
    /// Merge the enumerated catalogs and schemas into `tree`.
    pub fn apply(&self, tree: &mut SchemaTree) {
        tree.merge_catalogs(&self.catalogs, self.catalogs_exhaustive);
        for (catalog, listed) in &self.schemas {
            tree.merge_schemas(catalog, listed, self.schemas_exhaustive);
        }
    }
}

/// Enumerate catalogs and schemas for `scope`.
pub async fn plan<S: MetadataSource>(
    source: &S,
    rules: &IgnoreRules,
    scope: &DiscoveryScope,
) -> DbResult<DiscoveryPlan> {
    let mut plan = DiscoveryPlan::default();

    let (catalog, schema) = match scope {
        DiscoveryScope::All => {
            plan.catalogs_exhaustive = true;
            plan.schemas_exhaustive = true;
            let catalogs = source.list_catalogs().await?;
            plan_catalogs(source, rules, catalogs, &mut plan).await?;
            log_plan(&plan);
            return Ok(plan);
        }
        DiscoveryScope::Catalog(name) => {
            let catalogs = source.list_catalogs().await?;
            if !catalogs.contains(name) {
                return Err(DbError::schema("Catalog not found", name));
            }
            plan.schemas_exhaustive = true;
            plan_catalogs(source, rules, vec![name.clone()], &mut plan).await?;
            log_plan(&plan);
            return Ok(plan);
        }
        DiscoveryScope::Schema { catalog, schema } => (catalog.clone(), schema.clone()),
        DiscoveryScope::DefaultSchema => {
            let schema = source.default_schema().ok_or_else(|| {
                DbError::invalid_input("Connection has no default schema; choose one explicitly")
            })?;
            let catalog = source
                .list_catalogs()
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| DbError::schema("No catalog visible", schema.as_str()))?;
            (catalog, schema)
        }
    };

    // Single schema: nothing enumerated beyond the named unit
    let catalog_path = CatalogPath::catalog(&catalog);
    let catalog_ignored = rules.is_ignored(&catalog_path);
    plan.catalogs.push(Listed::new(&catalog, catalog_ignored));
    if catalog_ignored {
        plan.ignored.push(catalog_path);
    } else {
        let path = CatalogPath::schema(&catalog, &schema);
        let ignored = rules.is_ignored(&path);
        plan.schemas.push((catalog, vec![Listed::new(&schema, ignored)]));
        if ignored {
            plan.ignored.push(path);
        } else {
            plan.units.push(path);
        }
    }
    log_plan(&plan);
    Ok(plan)
}

async fn plan_catalogs<S: MetadataSource>(
    source: &S,
    rules: &IgnoreRules,
    catalogs: Vec<String>,
    plan: &mut DiscoveryPlan,
) -> DbResult<()> {
    let mut surviving = Vec::new();
    for name in catalogs {
        let path = CatalogPath::catalog(&name);
        let ignored = rules.is_ignored(&path);
        plan.catalogs.push(Listed::new(&name, ignored));
        if ignored {
            debug!(catalog = %name, "Catalog ignored");
            plan.ignored.push(path);
        } else {
            surviving.push(name);
        }
    }

    let width = source.concurrency().max(1);
    let listings: Vec<(String, Vec<String>)> = stream::iter(surviving)
        .map(|catalog| async move {
            let schemas = source.list_schemas(&catalog).await?;
            Ok::<_, DbError>((catalog, schemas))
        })
        .buffered(width)
        .try_collect()
        .await?;

    for (catalog, schemas) in listings {
        let mut listed = Vec::with_capacity(schemas.len());
        for schema in schemas {
            let path = CatalogPath::schema(&catalog, &schema);
            let ignored = rules.is_ignored(&path);
            listed.push(Listed::new(&schema, ignored));
            if ignored {
                debug!(schema = %path, "Schema ignored");
                plan.ignored.push(path);
            } else {
                plan.units.push(path);
            }
        }
        plan.schemas.push((catalog, listed));
    }
    Ok(())
}

fn log_plan(plan: &DiscoveryPlan) {
    info!(
        units = plan.units.len(),
        ignored = plan.ignored.len(),
        "Discovery planned"
    );
}

/// Enumerate one schema unit and fetch column details for its tables.
///
/// Fails only if the table listing itself fails; per-table detail errors are
/// recorded on the table.
pub async fn discover_schema<S: MetadataSource>(
    source: &S,
    rules: &IgnoreRules,
    unit: &CatalogPath,
) -> DbResult<Vec<TableNode>> {
    let segments = unit.segments();
    let (catalog, schema) = match segments {
        [catalog, schema] => (catalog.as_str(), schema.as_str()),
        _ => {
            return Err(DbError::invalid_input(format!(
                "Discovery unit must be a schema path, got '{}'",
                unit
            )));
        }
    };

    let mut tables = source.list_tables(catalog, schema).await?;
    for table in tables.iter_mut() {
        if rules.is_ignored(&unit.child(&table.name)) {
            table.ignored = true;
            table.columns.clear();
        }
    }

    let width = source.concurrency().max(1);
    let mut detailed: Vec<TableNode> = stream::iter(tables)
        .map(|mut table| async move {
            if table.ignored {
                return table;
            }
            let fetched = source.list_columns(catalog, schema, &table.name).await;
            match fetched {
                Ok(columns) if columns.is_empty() => {
                    table.mark_partial("No columns visible");
                    table
                }
                Ok(columns) => table.with_columns(columns),
                Err(e) => {
                    let partial = DbError::partial(
                        format!("{}.{}.{}", catalog, schema, table.name),
                        e.to_string(),
                    );
                    warn!(error = %partial, "Column details unavailable");
                    table.mark_partial(e.to_string());
                    table
                }
            }
        })
        .buffer_unordered(width)
        .collect()
        .await;

    detailed.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(
        unit = %unit,
        tables = detailed.len(),
        partial = detailed.iter().filter(|t| t.note.is_some()).count(),
        "Schema discovered"
    );
    Ok(detailed)
}

/// Plan and process every unit, merging into `tree`.
pub async fn refresh<S: MetadataSource>(
    source: &S,
    rules: &IgnoreRules,
    scope: &DiscoveryScope,
    tree: &mut SchemaTree,
) -> DbResult<DiscoveryPlan> {
    let plan = plan(source, rules, scope).await?;
    plan.apply(tree);

    for unit in &plan.units {
        let tables = discover_schema(source, rules, unit).await?;
        let segments = unit.segments();
        tree.merge_tables(&segments[0], &segments[1], tables);
    }
    tree.discovered_at = Some(Utc::now());
    Ok(plan)
}

/// Discover `scope` into a fresh tree.
pub async fn discover<S: MetadataSource>(
    source: &S,
    rules: &IgnoreRules,
    scope: &DiscoveryScope,
) -> DbResult<SchemaTree> {
    let mut tree = SchemaTree::new();
    refresh(source, rules, scope, &mut tree).await?;
    Ok(tree)
}

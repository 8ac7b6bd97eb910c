//! Metadata queries for schema introspection.
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Database-specific implementations are in their respective
//! submodules (postgres, mysql, sqlite), each providing the same interface, and
//! [`Connection`] exposes them through [`MetadataSource`]. Every call runs
//! under the connection's query timeout.

use crate::db::dialect::CatalogRule;
use crate::db::pool::{Connection, DbPool};
use crate::db::types::normalize_type;
use crate::error::DbResult;
use crate::models::{ColumnNode, DialectKind, TableNode, TableType};
use crate::tools::introspect::MetadataSource;
use tracing::debug;

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const CURRENT_DATABASE: &str = "SELECT current_database()::text";

        pub const LIST_SCHEMAS: &str = r#"
            SELECT schema_name::text AS schema_name
            FROM information_schema.schemata
            WHERE schema_name NOT IN ('pg_catalog', 'information_schema')
            AND schema_name NOT LIKE 'pg\_toast%'
            AND schema_name NOT LIKE 'pg\_temp\_%'
            ORDER BY schema_name
            "#;

        pub const LIST_TABLES: &str = r#"
            SELECT table_name::text AS table_name, table_type::text AS table_type
            FROM information_schema.tables
            WHERE table_schema = $1
            AND table_type IN ('BASE TABLE', 'VIEW')
            ORDER BY table_name
            "#;

        pub const LIST_COLUMNS: &str = r#"
            SELECT
                column_name::text AS column_name,
                CASE
                    WHEN data_type IN ('USER-DEFINED', 'ARRAY') THEN udt_name::text
                    ELSE data_type::text
                END AS data_type,
                is_nullable::text AS is_nullable
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#;
    }

    pub mod mysql {
        pub const LIST_SCHEMAS: &str = r#"
            SELECT CONVERT(SCHEMA_NAME USING utf8) AS SCHEMA_NAME
            FROM information_schema.SCHEMATA
            WHERE SCHEMA_NAME NOT IN ('mysql', 'information_schema', 'performance_schema', 'sys')
            ORDER BY SCHEMA_NAME
            "#;

        pub const LIST_TABLES: &str = r#"
            SELECT
                CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME,
                CONVERT(TABLE_TYPE USING utf8) AS TABLE_TYPE
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = ?
            AND TABLE_TYPE IN ('BASE TABLE', 'VIEW')
            ORDER BY TABLE_NAME
            "#;

        pub const LIST_COLUMNS: &str = r#"
            SELECT
                CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
                CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE,
                CONVERT(IS_NULLABLE USING utf8) AS IS_NULLABLE
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#;
    }

    pub mod sqlite {
        pub const LIST_SCHEMAS: &str =
            "SELECT name FROM pragma_database_list WHERE name <> 'temp' ORDER BY seq";

        /// `{schema}` is replaced by the quoted schema name.
        pub const LIST_TABLES: &str = r#"
            SELECT name, type FROM {schema}.sqlite_master
            WHERE type IN ('table', 'view')
            AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#;

        pub const LIST_COLUMNS: &str = r#"
            SELECT name, type, "notnull" AS not_null
            FROM pragma_table_info(?1, ?2)
            ORDER BY cid
            "#;
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod postgres {
    use super::*;
    use sqlx::{PgPool, Row};

    pub async fn current_database(pool: &PgPool) -> Result<String, sqlx::Error> {
        sqlx::query_scalar::<_, String>(queries::postgres::CURRENT_DATABASE)
            .fetch_one(pool)
            .await
    }

    pub async fn list_schemas(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(queries::postgres::LIST_SCHEMAS)
            .fetch_all(pool)
            .await?;
        rows.iter().map(|row| row.try_get("schema_name")).collect()
    }

    pub async fn list_tables(pool: &PgPool, schema: &str) -> Result<Vec<TableNode>, sqlx::Error> {
        let rows = sqlx::query(queries::postgres::LIST_TABLES)
            .bind(schema)
            .fetch_all(pool)
            .await?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("table_name")?;
                let type_str: String = row.try_get("table_type")?;
                Ok(TableNode::new(name, TableType::parse(&type_str)))
            })
            .collect()
    }

    pub async fn list_columns(
        pool: &PgPool,
        kind: DialectKind,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnNode>, sqlx::Error> {
        let rows = sqlx::query(queries::postgres::LIST_COLUMNS)
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("column_name")?;
                let data_type: String = row.try_get("data_type")?;
                let nullable: String = row.try_get("is_nullable")?;
                let tag = normalize_type(&data_type, kind);
                Ok(ColumnNode::new(name, data_type, tag, nullable == "YES"))
            })
            .collect()
    }
}

mod mysql {
    use super::*;
    use sqlx::mysql::MySqlRow;
    use sqlx::{MySqlPool, Row};

    /// Safely get a string from a MySQL row.
    /// MySQL may return VARBINARY instead of VARCHAR depending on charset configuration.
    fn get_string(row: &MySqlRow, column: &str) -> Result<String, sqlx::Error> {
        match row.try_get::<String, _>(column) {
            Ok(s) => Ok(s),
            Err(_) => {
                let bytes: Vec<u8> = row.try_get(column)?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
        }
    }

    pub async fn list_schemas(pool: &MySqlPool) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(queries::mysql::LIST_SCHEMAS)
            .fetch_all(pool)
            .await?;
        rows.iter().map(|row| get_string(row, "SCHEMA_NAME")).collect()
    }

    pub async fn list_tables(
        pool: &MySqlPool,
        schema: &str,
    ) -> Result<Vec<TableNode>, sqlx::Error> {
        let rows = sqlx::query(queries::mysql::LIST_TABLES)
            .bind(schema)
            .fetch_all(pool)
            .await?;

        rows.iter()
            .map(|row| {
                let name = get_string(row, "TABLE_NAME")?;
                let type_str = get_string(row, "TABLE_TYPE")?;
                Ok(TableNode::new(name, TableType::parse(&type_str)))
            })
            .collect()
    }

    pub async fn list_columns(
        pool: &MySqlPool,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnNode>, sqlx::Error> {
        let rows = sqlx::query(queries::mysql::LIST_COLUMNS)
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await?;

        rows.iter()
            .map(|row| {
                let name = get_string(row, "COLUMN_NAME")?;
                let column_type = get_string(row, "COLUMN_TYPE")?;
                let nullable = get_string(row, "IS_NULLABLE")?;
                let tag = normalize_type(&column_type, DialectKind::MySQL);
                Ok(ColumnNode::new(name, column_type, tag, nullable == "YES"))
            })
            .collect()
    }
}

mod sqlite {
    use super::*;
    use crate::db::dialect::SQLITE;
    use sqlx::{Row, SqlitePool};

    pub async fn list_schemas(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(queries::sqlite::LIST_SCHEMAS)
            .fetch_all(pool)
            .await?;
        rows.iter().map(|row| row.try_get("name")).collect()
    }

    pub async fn list_tables(
        pool: &SqlitePool,
        schema: &str,
    ) -> Result<Vec<TableNode>, sqlx::Error> {
        let query = queries::sqlite::LIST_TABLES.replace("{schema}", &SQLITE.quote_identifier(schema));
        let rows = sqlx::query(&query).fetch_all(pool).await?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("name")?;
                let type_str: String = row.try_get("type")?;
                Ok(TableNode::new(name, TableType::parse(&type_str)))
            })
            .collect()
    }

    pub async fn list_columns(
        pool: &SqlitePool,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnNode>, sqlx::Error> {
        let rows = sqlx::query(queries::sqlite::LIST_COLUMNS)
            .bind(table)
            .bind(schema)
            .fetch_all(pool)
            .await?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("name")?;
                let data_type: String = row.try_get::<Option<String>, _>("type")?.unwrap_or_default();
                let not_null: i64 = row.try_get("not_null")?;
                let tag = normalize_type(&data_type, DialectKind::SQLite);
                Ok(ColumnNode::new(name, data_type, tag, not_null == 0))
            })
            .collect()
    }
}

impl MetadataSource for Connection {
    async fn list_catalogs(&self) -> DbResult<Vec<String>> {
        let catalog = match self.profile().catalog_rule {
            CatalogRule::ServerCatalog(name) | CatalogRule::SingleFile(name) => name.to_string(),
            CatalogRule::CurrentDatabase => match self.pool().await? {
                DbPool::Postgres(p) => {
                    self.bounded("list catalogs", postgres::current_database(&p))
                        .await?
                }
                _ => self.database().unwrap_or_default().to_string(),
            },
        };
        debug!(connection = %self.name(), catalog = %catalog, "Listed catalogs");
        Ok(vec![catalog])
    }

    async fn list_schemas(&self, catalog: &str) -> DbResult<Vec<String>> {
        let pool = self.pool().await?;
        let schemas = match &pool {
            DbPool::Postgres(p) => self.bounded("list schemas", postgres::list_schemas(p)).await?,
            DbPool::MySql(p) => self.bounded("list schemas", mysql::list_schemas(p)).await?,
            DbPool::SQLite(p) => self.bounded("list schemas", sqlite::list_schemas(p)).await?,
        };
        debug!(
            connection = %self.name(),
            catalog = %catalog,
            count = schemas.len(),
            "Listed schemas"
        );
        Ok(schemas)
    }

    async fn list_tables(&self, catalog: &str, schema: &str) -> DbResult<Vec<TableNode>> {
        let pool = self.pool().await?;
        let tables = match &pool {
            DbPool::Postgres(p) => {
                self.bounded("list tables", postgres::list_tables(p, schema))
                    .await?
            }
            DbPool::MySql(p) => self.bounded("list tables", mysql::list_tables(p, schema)).await?,
            DbPool::SQLite(p) => {
                self.bounded("list tables", sqlite::list_tables(p, schema))
                    .await?
            }
        };
        debug!(
            connection = %self.name(),
            catalog = %catalog,
            schema = %schema,
            count = tables.len(),
            "Listed tables"
        );
        Ok(tables)
    }

    async fn list_columns(
        &self,
        _catalog: &str,
        schema: &str,
        table: &str,
    ) -> DbResult<Vec<ColumnNode>> {
        let pool = self.pool().await?;
        match &pool {
            DbPool::Postgres(p) => {
                self.bounded(
                    "list columns",
                    postgres::list_columns(p, self.kind(), schema, table),
                )
                .await
            }
            DbPool::MySql(p) => {
                self.bounded("list columns", mysql::list_columns(p, schema, table))
                    .await
            }
            DbPool::SQLite(p) => {
                self.bounded("list columns", sqlite::list_columns(p, schema, table))
                    .await
            }
        }
    }

    fn default_schema(&self) -> Option<String> {
        Connection::default_schema(self).map(String::from)
    }

    fn concurrency(&self) -> usize {
        self.max_connections().max(1) as usize
    }
}

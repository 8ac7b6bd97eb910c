//! Connection resolution and pool management.
//!
//! A connection string is normalized (comments stripped, environment
//! placeholders expanded), its dialect detected, resolver-only query options
//! removed and the scheme rewritten to the driver's canonical one. The pool is
//! created lazily with database-specific pools (MySqlPool, PgPool, SqlitePool)
//! and checked with a bounded liveness query before the connection is
//! registered.

use crate::config::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_QUERY_TIMEOUT_SECS, PoolOptions, extract_options,
};
use crate::db::dialect::{DialectProfile, detect_kind, profile_for};
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::DialectKind;
use crate::models::connection::{
    ConnectionSummary, mask_connection_string, validate_connection_name,
};
use sqlx::{
    MySqlPool, PgPool, SqlitePool, mysql::MySqlConnectOptions, mysql::MySqlPoolOptions,
    postgres::PgConnectOptions, postgres::PgPoolOptions, sqlite::SqliteConnectOptions,
    sqlite::SqlitePoolOptions,
};
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// Query options consumed by the resolver and never passed to the driver.
const RESOLVER_OPTION_KEYS: &[&str] = &[
    "dialect",
    "driver",
    "max_connections",
    "min_connections",
    "idle_timeout",
    "acquire_timeout",
    "test_before_acquire",
];

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.close().await,
            Postgres(pool) => pool.close().await,
            SQLite(pool) => pool.close().await,
        })
    }
}

/// Strip comments and join a possibly multi-line connection string.
///
/// Lines starting with `#` or `--` are dropped, as is a trailing ` # ...`
/// comment on any line.
pub fn strip_comments(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("--"))
        .map(|line| {
            let cut = line
                .char_indices()
                .find(|&(i, c)| c == '#' && i > 0 && line[..i].ends_with(char::is_whitespace))
                .map(|(i, _)| i)
                .unwrap_or(line.len());
            line[..cut].trim_end()
        })
        .collect::<Vec<_>>()
        .concat()
}

/// Expand `${VAR}` and `$VAR` placeholders with `lookup`.
///
/// A `$` not followed by a variable name is kept as is. A missing variable is
/// an error naming the variable, never the string being expanded.
pub fn expand_env_with<F>(s: &str, lookup: F) -> DbResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let is_start = |c: char| c.is_ascii_alphabetic() || c == '_';
    let is_part = |c: char| c.is_ascii_alphanumeric() || c == '_';

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) if end > 0 && braced[..end].chars().all(is_part) => {
                    (&braced[..end], end + 2)
                }
                _ => ("", 0),
            }
        } else if after.starts_with(is_start) {
            let end = after.find(|c: char| !is_part(c)).unwrap_or(after.len());
            (&after[..end], end)
        } else {
            ("", 0)
        };

        if name.is_empty() {
            out.push('$');
            rest = after;
            continue;
        }
        let value = lookup(name).ok_or_else(|| {
            DbError::invalid_input(format!("Environment variable {} is not set", name))
        })?;
        out.push_str(&value);
        rest = &after[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Strip comments and expand placeholders from the process environment.
pub fn normalize_connection_string(raw: &str) -> DbResult<String> {
    let stripped = strip_comments(raw);
    let expanded = expand_env_with(&stripped, |name| std::env::var(name).ok())?;
    let trimmed = expanded.trim();
    if trimmed.is_empty() {
        return Err(DbError::invalid_input("Connection string is empty"));
    }
    Ok(trimmed.to_string())
}

/// Scheme the sqlx driver for `kind` expects.
fn driver_scheme(kind: DialectKind) -> &'static str {
    match kind {
        DialectKind::PostgreSQL | DialectKind::Redshift => "postgres",
        DialectKind::MySQL => "mysql",
        _ => "sqlite",
    }
}

/// Rewrite the scheme to the driver's canonical one (`jdbc:` wrapper dropped).
fn canonicalize_scheme(s: &str, kind: DialectKind) -> String {
    let s = match s.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => &s[5..],
        _ => s,
    };
    match s.find(':') {
        Some(end) => format!("{}{}", driver_scheme(kind), &s[end..]),
        None => s.to_string(),
    }
}

fn db_name(url: &Url) -> Option<String> {
    url.path()
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// A connection string reduced to what the driver and resolver need.
#[derive(Clone)]
pub struct PreparedConnection {
    pub profile: &'static DialectProfile,
    /// Driver-ready URL (sensitive - not logged)
    url: String,
    pub database: Option<String>,
    pub pool_options: PoolOptions,
}

impl PreparedConnection {
    pub fn parse(raw: &str, dialect_override: Option<&str>) -> DbResult<Self> {
        let normalized = normalize_connection_string(raw)?;
        let kind = detect_kind(&normalized, dialect_override)?;
        let profile = profile_for(kind)?;

        let canonical = canonicalize_scheme(&normalized, kind);
        let mut url = Url::parse(&canonical)
            .map_err(|e| DbError::invalid_input(format!("Invalid connection URL: {e}")))?;
        let mut opts = extract_options(&mut url, RESOLVER_OPTION_KEYS);
        let pool_options = PoolOptions::from_options(&mut opts);
        pool_options.validate().map_err(DbError::invalid_input)?;

        let database = db_name(&url);
        if kind == DialectKind::SQLite && database.is_none() {
            return Err(DbError::invalid_input(
                "SQLite requires a database file path: sqlite:path/to/db.sqlite",
            ));
        }

        Ok(Self {
            profile,
            url: url.to_string(),
            database,
            pool_options,
        })
    }

    pub fn kind(&self) -> DialectKind {
        self.profile.kind
    }

    pub fn masked_url(&self) -> String {
        mask_connection_string(&self.url)
    }
}

impl std::fmt::Debug for PreparedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedConnection")
            .field("kind", &self.profile.kind)
            .field("url", &self.masked_url())
            .field("database", &self.database)
            .field("pool_options", &self.pool_options)
            .finish()
    }
}

/// A resolved, named connection.
///
/// Owns the pool; callers borrow it per operation with [`Connection::pool`].
pub struct Connection {
    name: String,
    prepared: PreparedConnection,
    pool: RwLock<Option<DbPool>>,
    server_version: Option<String>,
    connect_timeout: Duration,
    query_timeout: Duration,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("kind", &self.prepared.profile.kind)
            .field("url", &self.prepared.masked_url())
            .field("server_version", &self.server_version)
            .finish_non_exhaustive()
    }
}

impl Connection {
    fn new(
        name: impl Into<String>,
        prepared: PreparedConnection,
        connect_timeout: Duration,
        query_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            prepared,
            pool: RwLock::new(None),
            server_version: None,
            connect_timeout,
            query_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn profile(&self) -> &'static DialectProfile {
        self.prepared.profile
    }

    pub fn kind(&self) -> DialectKind {
        self.prepared.profile.kind
    }

    /// Database named in the connection URL.
    pub fn database(&self) -> Option<&str> {
        self.prepared.database.as_deref()
    }

    /// Schema used by the `DefaultSchema` discovery scope.
    pub fn default_schema(&self) -> Option<&str> {
        self.prepared.profile.default_schema.or(self.database())
    }

    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    pub fn masked_url(&self) -> String {
        self.prepared.masked_url()
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Maximum pool size; also the discovery fan-out width.
    pub fn max_connections(&self) -> u32 {
        self.prepared
            .pool_options
            .max_connections_or_default(self.kind() == DialectKind::SQLite)
    }

    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            name: self.name.clone(),
            kind: self.kind(),
            masked_url: self.masked_url(),
            server_version: self.server_version.clone(),
        }
    }

    /// Borrow the pool, creating it if it was never created or was reset.
    pub async fn pool(&self) -> DbResult<DbPool> {
        if let Some(pool) = self.pool.read().await.as_ref() {
            return Ok(pool.clone());
        }
        let mut slot = self.pool.write().await;
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }
        let pool = self.create_pool()?;
        debug!(connection = %self.name, "Created connection pool");
        *slot = Some(pool.clone());
        Ok(pool)
    }

    /// Drop the pool after a connectivity failure; the next borrow recreates it.
    pub async fn reset_pool(&self) {
        let old = self.pool.write().await.take();
        if let Some(pool) = old {
            info!(connection = %self.name, "Resetting connection pool");
            pool.close().await;
        }
    }

    pub async fn close(&self) {
        let old = self.pool.write().await.take();
        if let Some(pool) = old {
            pool.close().await;
        }
    }

    /// Run one database call under the query timeout.
    ///
    /// A connectivity failure drops the pool so the next borrow reconnects.
    pub async fn bounded<T, F>(&self, operation: &str, fut: F) -> DbResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        let err = match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => DbError::from(e),
            Err(_) => return Err(DbError::timeout(operation, self.query_timeout.as_secs())),
        };
        if matches!(err, DbError::ConnectionUnreachable { .. }) {
            warn!(connection = %self.name, operation, error = %err, "Connectivity failure");
            self.reset_pool().await;
        }
        Err(err)
    }

    /// Lightweight liveness query under the connect timeout.
    pub async fn check_liveness(&self) -> DbResult<()> {
        let pool = self.pool().await?;
        let sql = self.profile().liveness_query;
        let probe = async {
            impl_db_dispatch!(&pool, {
                MySql(p) => sqlx::query(sql).execute(p).await.map(|_| ()),
                Postgres(p) => sqlx::query(sql).execute(p).await.map(|_| ()),
                SQLite(p) => sqlx::query(sql).execute(p).await.map(|_| ()),
            })
        };

        match tokio::time::timeout(self.connect_timeout, probe).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                let message = e.to_string();
                let hint = connection_suggestion(self.profile(), &message);
                self.reset_pool().await;
                Err(DbError::unreachable(message, hint))
            }
            Err(_) => {
                self.reset_pool().await;
                Err(DbError::unreachable(
                    format!(
                        "Liveness check timed out after {}s",
                        self.connect_timeout.as_secs()
                    ),
                    self.profile().remediation,
                ))
            }
        }
    }

    /// Get the server version, best-effort.
    async fn fetch_server_version(&self) -> Option<String> {
        let pool = self.pool().await.ok()?;
        let sql = self.profile().version_query;
        let result = self
            .bounded("server version", async {
                impl_db_dispatch!(&pool, {
                    MySql(p) => sqlx::query_scalar::<_, String>(sql).fetch_one(p).await,
                    Postgres(p) => sqlx::query_scalar::<_, String>(sql).fetch_one(p).await,
                    SQLite(p) => sqlx::query_scalar::<_, String>(sql).fetch_one(p).await,
                })
            })
            .await;

        match result {
            Ok(version) => {
                debug!(connection = %self.name, version = %version, "Got server version");
                Some(version)
            }
            Err(e) => {
                warn!(connection = %self.name, error = %e, "Failed to get server version");
                None
            }
        }
    }

    /// Create a lazy pool; no connection is opened until first use.
    fn create_pool(&self) -> DbResult<DbPool> {
        let opts = &self.prepared.pool_options;
        let url = &self.prepared.url;
        let is_sqlite = self.kind() == DialectKind::SQLite;
        let acquire_timeout = Duration::from_secs(opts.acquire_timeout_or_default());
        let idle_timeout = Some(Duration::from_secs(opts.idle_timeout_or_default()));
        let invalid = |e: sqlx::Error| {
            DbError::invalid_input(format!(
                "Invalid {} connection string: {}",
                self.kind(),
                e
            ))
        };

        let pool = match self.kind() {
            DialectKind::MySQL => {
                let options = MySqlConnectOptions::from_str(url)
                    .map_err(invalid)?
                    .charset("utf8mb4");
                DbPool::MySql(
                    MySqlPoolOptions::new()
                        .min_connections(opts.min_connections_or_default())
                        .max_connections(opts.max_connections_or_default(is_sqlite))
                        .acquire_timeout(acquire_timeout)
                        .idle_timeout(idle_timeout)
                        .test_before_acquire(opts.test_before_acquire_or_default())
                        .connect_lazy_with(options),
                )
            }
            DialectKind::PostgreSQL | DialectKind::Redshift => {
                let options = PgConnectOptions::from_str(url).map_err(invalid)?;
                DbPool::Postgres(
                    PgPoolOptions::new()
                        .min_connections(opts.min_connections_or_default())
                        .max_connections(opts.max_connections_or_default(is_sqlite))
                        .acquire_timeout(acquire_timeout)
                        .idle_timeout(idle_timeout)
                        .test_before_acquire(opts.test_before_acquire_or_default())
                        .connect_lazy_with(options),
                )
            }
            DialectKind::SQLite => {
                let options = SqliteConnectOptions::from_str(url)
                    .map_err(invalid)?
                    .read_only(true);
                DbPool::SQLite(
                    SqlitePoolOptions::new()
                        .min_connections(opts.min_connections_or_default())
                        .max_connections(opts.max_connections_or_default(is_sqlite))
                        .acquire_timeout(acquire_timeout)
                        .idle_timeout(idle_timeout)
                        .test_before_acquire(opts.test_before_acquire_or_default())
                        .connect_lazy_with(options),
                )
            }
            other => return Err(DbError::unsupported_dialect(other.display_name())),
        };
        Ok(pool)
    }
}

/// Generate a remediation hint from driver error text.
pub fn connection_suggestion(profile: &DialectProfile, error_text: &str) -> String {
    let error_str = error_text.to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            profile.kind
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the username and password in the connection string".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check the TLS mode (sslmode / ssl-mode) and server certificates".to_string();
    }

    profile.remediation.to_string()
}

/// Registry of named connections.
#[derive(Debug, Clone)]
pub struct ConnectionResolver {
    connections: Arc<RwLock<HashMap<String, Arc<Connection>>>>,
    connect_timeout: Duration,
    query_timeout: Duration,
}

impl ConnectionResolver {
    /// Create a new resolver with default timeouts.
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Resolve and register a connection, replacing any previous one of that name.
    ///
    /// Fails with `ConnectionUnreachable` if the liveness check does not pass;
    /// nothing is registered in that case. No automatic retry.
    pub async fn resolve(
        &self,
        name: &str,
        connection_string: &str,
        dialect_override: Option<&str>,
    ) -> DbResult<Arc<Connection>> {
        validate_connection_name(name)?;
        let prepared = PreparedConnection::parse(connection_string, dialect_override)?;

        info!(
            connection = %name,
            kind = %prepared.kind(),
            "Resolving connection"
        );

        let mut connection =
            Connection::new(name, prepared, self.connect_timeout, self.query_timeout);
        if let Err(e) = connection.check_liveness().await {
            warn!(connection = %name, error = %e, "Connection unreachable");
            connection.close().await;
            return Err(e);
        }
        connection.server_version = connection.fetch_server_version().await;

        let connection = Arc::new(connection);
        let replaced = {
            let mut connections = self.connections.write().await;
            connections.insert(name.to_string(), Arc::clone(&connection))
        }; // Lock released here

        if let Some(old) = replaced {
            debug!(connection = %name, "Replacing existing connection");
            old.close().await;
        }

        info!(
            connection = %name,
            server_version = ?connection.server_version(),
            "Connected successfully"
        );
        Ok(connection)
    }

    /// Get a registered connection by name.
    pub async fn get(&self, name: &str) -> DbResult<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::connection_not_found(name))
    }

    /// Unregister a connection and close its pool.
    pub async fn remove(&self, name: &str) -> DbResult<()> {
        let removed = self.connections.write().await.remove(name);
        match removed {
            Some(connection) => {
                info!(connection = %name, "Closing connection");
                connection.close().await;
                Ok(())
            }
            None => Err(DbError::connection_not_found(name)),
        }
    }

    /// List registered connections (no secrets exposed).
    pub async fn list(&self) -> Vec<ConnectionSummary> {
        let connections = self.connections.read().await;
        let mut summaries: Vec<_> = connections.values().map(|c| c.summary()).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Close all connections and clear the registry.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.connections.write().await.drain().collect();
        for (name, connection) in drained {
            info!(connection = %name, "Closing connection");
            connection.close().await;
        }
        info!("All connections closed");
    }
}

impl Default for ConnectionResolver {
    fn default() -> Self {
        Self::new()
    }
}

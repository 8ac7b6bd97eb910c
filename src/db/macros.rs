//! Database dispatch macros.
//!
//! Per-dialect code paths live in separate submodules; these macros generate
//! the `DbPool` match that routes to them.

/// Macro for generating database dispatch match arms.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => mysql::list_schemas(p).await,
///     Postgres(p) => postgres::list_schemas(p).await,
///     SQLite(p) => sqlite::list_schemas(p).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;

#[cfg(test)]
mod tests {
    use crate::db::DbPool;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_dispatch_routes_to_variant() {
        let pool = DbPool::SQLite(
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect_lazy("sqlite::memory:")
                .unwrap(),
        );
        let routed = impl_db_dispatch!(&pool, {
            MySql(_p) => "mysql",
            Postgres(_p) => "postgres",
            SQLite(_p) => "sqlite",
        });
        assert_eq!(routed, "sqlite");
        pool.close().await;
    }
}

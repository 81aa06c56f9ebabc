//! Connection pool management.
//!
//! [`DbPool`] wraps a backend-specific sqlx pool. The process-wide pool is set
//! once with [`configure`]; later calls are no-ops that hand back the pool
//! configured first. Pools can also be built directly and passed around
//! explicitly, which is what tests do.

use crate::config::{DatabaseConfig, PoolOptions};
use crate::db::macros::DatabaseType;
use crate::db::transaction::DbTransaction;
use crate::error::{DbError, DbResult};
use sqlx::pool::PoolOptions as SqlxPoolOptions;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{PgPool, SqlitePool};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, info};

static GLOBAL_POOL: OnceLock<DbPool> = OnceLock::new();

/// Backend-specific connection pool.
#[derive(Debug, Clone)]
pub enum DbPool {
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Build a pool without opening any connection yet.
    ///
    /// Malformed connection parameters are reported here as
    /// [`DbError::Configuration`]; connectivity problems surface on first use.
    pub fn connect_lazy(connection_string: &str, options: &PoolOptions) -> DbResult<Self> {
        options.validate().map_err(DbError::configuration)?;

        match DatabaseType::from_connection_string(connection_string) {
            DatabaseType::Postgres => {
                let connect = postgres_connect_options(connection_string)?;
                let pool = pool_options(options, false).connect_lazy_with(connect);
                Ok(DbPool::Postgres(pool))
            }
            DatabaseType::SQLite => {
                let connect = SqliteConnectOptions::from_str(connection_string)
                    .map_err(|e| {
                        DbError::configuration(format!("Invalid SQLite connection string: {}", e))
                    })?
                    .create_if_missing(true);
                let pool = pool_options(options, true).connect_lazy_with(connect);
                Ok(DbPool::SQLite(pool))
            }
        }
    }

    /// Build a pool and verify that the database answers.
    pub async fn connect(connection_string: &str, options: &PoolOptions) -> DbResult<Self> {
        let pool = Self::connect_lazy(connection_string, options)?;
        pool.ping().await?;
        info!(db_type = %pool.db_type(), "Connected successfully");
        Ok(pool)
    }

    /// Run a trivial statement outside of any transaction.
    pub async fn ping(&self) -> DbResult<()> {
        impl_db_dispatch!(DbPool, self, {
            Postgres(p) => sqlx::query("select 1").execute(p).await.map(|_| ())?,
            SQLite(p) => sqlx::query("select 1").execute(p).await.map(|_| ())?,
        });
        Ok(())
    }

    /// Open a new transaction on a pooled connection.
    pub async fn begin(&self) -> DbResult<DbTransaction> {
        let tx = impl_db_dispatch!(DbPool, self, {
            Postgres(p) => DbTransaction::Postgres(p.begin().await?),
            SQLite(p) => DbTransaction::SQLite(p.begin().await?),
        });
        Ok(tx)
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(DbPool, self, {
            Postgres(p) => p.close().await,
            SQLite(p) => p.close().await,
        })
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::Postgres(_) => DatabaseType::Postgres,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

fn pool_options<DB: sqlx::Database>(options: &PoolOptions, is_sqlite: bool) -> SqlxPoolOptions<DB> {
    SqlxPoolOptions::<DB>::new()
        .min_connections(options.min_connections_or_default())
        .max_connections(options.max_connections_or_default(is_sqlite))
        .acquire_timeout(options.acquire_timeout_or_default())
        .idle_timeout(Some(options.idle_timeout_or_default()))
        .test_before_acquire(options.test_before_acquire_or_default())
}

/// Translate a Postgres connection string into driver options.
///
/// URLs are handed to the driver as-is. Keyword/value strings go through
/// [`DatabaseConfig`]; runtime parameters the driver knows natively
/// (`application_name`, `sslmode`, `statement_cache_capacity`) are applied as
/// such, every other one becomes a session default.
pub fn postgres_connect_options(connection_string: &str) -> DbResult<PgConnectOptions> {
    let lower = connection_string.trim_start().to_ascii_lowercase();
    if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
        return PgConnectOptions::from_str(connection_string.trim()).map_err(|e| {
            DbError::configuration(format!("Invalid PostgreSQL connection URL: {}", e))
        });
    }

    let config = DatabaseConfig::parse(connection_string).map_err(DbError::configuration)?;

    let mut options = PgConnectOptions::new();
    if !config.host.is_empty() {
        options = options.host(&config.host);
    }
    if config.port != 0 {
        options = options.port(config.port);
    }
    if !config.database.is_empty() {
        options = options.database(&config.database);
    }
    if !config.user.is_empty() {
        options = options.username(&config.user);
    }
    if !config.password.is_empty() {
        options = options.password(&config.password);
    }

    let mut session = Vec::new();
    for (key, value) in &config.runtime_params {
        match key.to_ascii_lowercase().as_str() {
            "application_name" => options = options.application_name(value),
            "sslmode" => {
                let mode = value.parse::<PgSslMode>().map_err(|e| {
                    DbError::configuration(format!("Invalid sslmode '{}': {}", value, e))
                })?;
                options = options.ssl_mode(mode);
            }
            "statement_cache_capacity" => {
                let capacity = value.parse::<usize>().map_err(|_| {
                    DbError::configuration(format!(
                        "Invalid statement_cache_capacity '{}'",
                        value
                    ))
                })?;
                options = options.statement_cache_capacity(capacity);
            }
            _ => session.push((key.as_str(), value.as_str())),
        }
    }
    if !session.is_empty() {
        options = options.options(session);
    }

    Ok(options)
}

/// Initialize the process-wide pool with default pool options.
///
/// Only the first call has an effect; subsequent calls return the pool that
/// is already configured and do not look at their argument.
pub fn configure(connection_string: &str) -> DbResult<&'static DbPool> {
    configure_with_options(connection_string, &PoolOptions::default())
}

/// Initialize the process-wide pool from structured settings.
pub fn configure_from_config(config: &DatabaseConfig) -> DbResult<&'static DbPool> {
    configure(&config.to_string())
}

/// Initialize the process-wide pool with explicit pool options.
pub fn configure_with_options(
    connection_string: &str,
    options: &PoolOptions,
) -> DbResult<&'static DbPool> {
    if let Some(pool) = GLOBAL_POOL.get() {
        debug!("Connection pool already configured, ignoring new configuration");
        return Ok(pool);
    }

    let pool = DbPool::connect_lazy(connection_string, options)?;
    let configured = GLOBAL_POOL.get_or_init(|| pool);
    info!(db_type = %configured.db_type(), "Configured process-wide connection pool");
    Ok(configured)
}

/// The process-wide pool, if [`configure`] has been called.
pub fn global() -> Option<&'static DbPool> {
    GLOBAL_POOL.get()
}

//! Lazily-started, request-scoped database transactions.
//!
//! A [`Transaction`] is a handle that owns at most one underlying sqlx
//! transaction. Nothing is opened until the first [`execute`](Transaction::execute)
//! or [`query`](Transaction::query); [`commit`](Transaction::commit) and
//! [`rollback`](Transaction::rollback) finish it and are no-ops when nothing
//! was started, so a request that never touches the database never acquires a
//! connection.
//!
//! Clones of a handle share the same unit of work. That is how the
//! request-scoping middleware and the handler both reach it, and it must not
//! leave the request it was created for.

use crate::context::TxContext;
use crate::db::params::{bind_postgres_param, bind_sqlite_param};
use crate::db::pool::{self, DbPool};
use crate::db::row::DbRow;
use crate::error::{DbError, DbResult};
use crate::models::QueryParam;
use chrono::Utc;
use futures_util::TryStreamExt;
use sqlx::{Postgres, Sqlite};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Backend-specific open transaction.
///
/// Dropping an unfinished value makes the driver issue a ROLLBACK before the
/// connection goes back to the pool.
pub enum DbTransaction {
    Postgres(sqlx::Transaction<'static, Postgres>),
    SQLite(sqlx::Transaction<'static, Sqlite>),
}

impl DbTransaction {
    pub async fn commit(self) -> DbResult<()> {
        impl_db_dispatch!(DbTransaction, self, {
            Postgres(tx) => tx.commit().await.map_err(DbError::from),
            SQLite(tx) => tx.commit().await.map_err(DbError::from),
        })
    }

    pub async fn rollback(self) -> DbResult<()> {
        impl_db_dispatch!(DbTransaction, self, {
            Postgres(tx) => tx.rollback().await.map_err(DbError::from),
            SQLite(tx) => tx.rollback().await.map_err(DbError::from),
        })
    }

    /// Run a statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let rows_affected = match self {
            DbTransaction::Postgres(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_postgres_param(query, param);
                }
                query.execute(&mut **tx).await?.rows_affected()
            }
            DbTransaction::SQLite(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite_param(query, param);
                }
                query.execute(&mut **tx).await?.rows_affected()
            }
        };
        Ok(rows_affected)
    }

    /// Stream the result rows through `handler`, stopping at the first error.
    async fn for_each_row<H>(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        handler: &mut H,
    ) -> DbResult<u32>
    where
        H: FnMut(&DbRow) -> DbResult<()> + Send,
    {
        let mut count = 0u32;
        match self {
            DbTransaction::Postgres(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_postgres_param(query, param);
                }
                let mut rows = query.fetch(&mut **tx);
                while let Some(row) = rows.try_next().await? {
                    handler(&DbRow::Postgres(row))?;
                    count += 1;
                }
            }
            DbTransaction::SQLite(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite_param(query, param);
                }
                let mut rows = query.fetch(&mut **tx);
                while let Some(row) = rows.try_next().await? {
                    handler(&DbRow::SQLite(row))?;
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

struct Shared {
    pool: DbPool,
    context: TxContext,
    debug: bool,
    slot: Mutex<Option<DbTransaction>>,
}

/// Handle to the unit of work of one request.
#[derive(Clone)]
pub struct Transaction {
    shared: Arc<Shared>,
}

impl Transaction {
    /// Create a handle on the process-wide pool, with diagnostics off.
    ///
    /// # Panics
    ///
    /// Panics if [`configure`](crate::db::configure) has not been called.
    pub fn new(context: TxContext) -> Self {
        let pool = match pool::global() {
            Some(pool) => pool.clone(),
            None => panic!("there is no database connection set; call db::configure first"),
        };
        Self::with_pool(pool, context, false)
    }

    /// Create a handle on an explicit pool.
    pub fn with_pool(pool: DbPool, context: TxContext, debug: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                pool,
                context,
                debug,
                slot: Mutex::new(None),
            }),
        }
    }

    /// The context this handle was created with.
    pub fn context(&self) -> &TxContext {
        &self.shared.context
    }

    /// Whether an underlying transaction is currently open.
    pub async fn is_active(&self) -> bool {
        self.shared.slot.lock().await.is_some()
    }

    pub fn is_debug(&self) -> bool {
        self.shared.debug
    }

    pub fn pool(&self) -> &DbPool {
        &self.shared.pool
    }

    /// Run a statement inside the transaction, starting it if needed.
    ///
    /// A failed statement is logged and returned as is. The transaction is
    /// left open; whether to roll back is up to the caller.
    pub async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let mut slot = self.shared.slot.lock().await;
        let tx = self.begin(&mut slot).await?;

        match self.context().run("execute", tx.execute(sql, params)).await {
            Ok(rows_affected) => {
                debug!(
                    request_id = %self.context().request_id(),
                    sql = %sql,
                    rows_affected,
                    "Statement executed"
                );
                Ok(rows_affected)
            }
            Err(e) => {
                error!(
                    request_id = %self.context().request_id(),
                    sql = %sql,
                    params = ?param_types(params),
                    error = %e,
                    "Statement failed"
                );
                Err(e)
            }
        }
    }

    /// Run a query inside the transaction and hand every row to `handler`.
    ///
    /// Returns the number of rows processed. A query error or a handler
    /// error stops the iteration, releases the cursor and is returned.
    pub async fn query<H>(&self, sql: &str, params: &[QueryParam], mut handler: H) -> DbResult<u32>
    where
        H: FnMut(&DbRow) -> DbResult<()> + Send,
    {
        let mut slot = self.shared.slot.lock().await;
        let tx = self.begin(&mut slot).await?;

        let result = self
            .context()
            .run("query", tx.for_each_row(sql, params, &mut handler))
            .await;
        match &result {
            Ok(row_count) => debug!(
                request_id = %self.context().request_id(),
                sql = %sql,
                row_count,
                "Query completed"
            ),
            Err(e) => debug!(
                request_id = %self.context().request_id(),
                sql = %sql,
                params = ?param_types(params),
                error = %e,
                "Query aborted"
            ),
        }
        result
    }

    /// Count the rows a query yields without looking at them.
    pub async fn query_count(&self, sql: &str, params: &[QueryParam]) -> DbResult<u32> {
        self.query(sql, params, |_| Ok(())).await
    }

    /// Commit the transaction if one was started.
    ///
    /// On failure the transaction is rolled back by the driver and the commit
    /// error is returned. Either way the handle is finished afterwards, so a
    /// second commit or a rollback does nothing.
    pub async fn commit(&self) -> DbResult<()> {
        let mut slot = self.shared.slot.lock().await;
        let Some(tx) = slot.take() else {
            return Ok(());
        };

        if self.shared.debug {
            info!(
                request_id = %self.context().request_id(),
                at = %Utc::now().to_rfc3339(),
                "Committing transaction"
            );
        }

        match self.context().run("commit", tx.commit()).await {
            Ok(()) => {
                if self.shared.debug {
                    info!(
                        request_id = %self.context().request_id(),
                        at = %Utc::now().to_rfc3339(),
                        "Transaction committed"
                    );
                }
                Ok(())
            }
            Err(e) => {
                error!(
                    request_id = %self.context().request_id(),
                    error = %e,
                    "Commit failed, transaction rolled back"
                );
                Err(e)
            }
        }
    }

    /// Roll the transaction back if one was started.
    ///
    /// Failures are logged, never returned.
    pub async fn rollback(&self) {
        let mut slot = self.shared.slot.lock().await;
        let Some(tx) = slot.take() else {
            return;
        };

        if self.shared.debug {
            info!(
                request_id = %self.context().request_id(),
                at = %Utc::now().to_rfc3339(),
                "Rolling back transaction"
            );
        }

        if let Err(e) = tx.rollback().await {
            warn!(
                request_id = %self.context().request_id(),
                error = %e,
                "Rollback failed"
            );
            return;
        }

        if self.shared.debug {
            info!(
                request_id = %self.context().request_id(),
                at = %Utc::now().to_rfc3339(),
                "Transaction rolled back"
            );
        }
    }

    /// Open the underlying transaction unless it already is.
    ///
    /// The slot stays empty when begin fails, so the next call tries again.
    async fn begin<'a>(
        &self,
        slot: &'a mut Option<DbTransaction>,
    ) -> DbResult<&'a mut DbTransaction> {
        if slot.is_none() {
            match self.context().run("begin", self.shared.pool.begin()).await {
                Ok(tx) => {
                    debug!(request_id = %self.context().request_id(), "Transaction started");
                    *slot = Some(tx);
                }
                Err(e) => {
                    error!(
                        request_id = %self.context().request_id(),
                        error = %e,
                        "Failed to start transaction"
                    );
                    return Err(e);
                }
            }
        }
        slot.as_mut()
            .ok_or_else(|| DbError::internal("transaction slot is empty after begin"))
    }
}

/// Parameter kinds for failure logs; values stay out of the log.
fn param_types(params: &[QueryParam]) -> Vec<&'static str> {
    params.iter().map(QueryParam::type_name).collect()
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("request_id", &self.context().request_id())
            .field("db_type", &self.shared.pool.db_type())
            .field("debug", &self.shared.debug)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;

    fn unreachable_postgres() -> DbPool {
        let options = PoolOptions {
            acquire_timeout_secs: Some(1),
            ..Default::default()
        };
        DbPool::connect_lazy("host=127.0.0.1 port=1 database=none user=none", &options).unwrap()
    }

    #[tokio::test]
    async fn test_finishing_unstarted_transaction_is_noop() {
        let tx = Transaction::with_pool(unreachable_postgres(), TxContext::new(), false);

        assert!(!tx.is_active().await);
        tx.commit().await.unwrap();
        tx.rollback().await;
        tx.commit().await.unwrap();
        assert!(!tx.is_active().await);
    }

    #[tokio::test]
    async fn test_clones_share_the_unit_of_work() {
        let tx = Transaction::with_pool(unreachable_postgres(), TxContext::new(), true);
        let other = tx.clone();

        assert!(Arc::ptr_eq(&tx.shared, &other.shared));
        assert_eq!(tx.context().request_id(), other.context().request_id());
        assert!(other.is_debug());
    }

    #[tokio::test]
    async fn test_debug_output_names_request() {
        let ctx = TxContext::new().with_request_id("req-42");
        let tx = Transaction::with_pool(unreachable_postgres(), ctx, false);

        let rendered = format!("{:?}", tx);
        assert!(rendered.contains("req-42"));
        assert!(rendered.contains("Postgres"));
    }

    #[test]
    fn test_param_types_hide_values() {
        let params = vec![
            QueryParam::from("secret"),
            QueryParam::from(7i64),
            QueryParam::Null,
            QueryParam::Json(serde_json::json!({"k": 1})),
        ];
        assert_eq!(param_types(&params), vec!["string", "int", "null", "json"]);
    }
}

//! Request-scoped execution context.
//!
//! [`TxContext`] is an immutable value: deriving a context with a deadline or a
//! bound transaction produces a new one and leaves the original untouched.
//! The request-scoping middleware binds a [`Transaction`] into the context and
//! stores the result in the request extensions, where handlers pick it up
//! through the extractors in this module.

use crate::db::Transaction;
use crate::error::{DbError, DbResult};
use axum::extract::FromRequestParts;
use axum::http::Extensions;
use axum::http::request::Parts;
use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

const MISSING_MIDDLEWARE: &str =
    "no transaction in the request context; wrap the router with TransactionScope";

/// Request id, optional deadline and the bound transaction, if any.
#[derive(Debug, Clone)]
pub struct TxContext {
    request_id: String,
    deadline: Option<Instant>,
    transaction: Option<Transaction>,
}

impl TxContext {
    /// Fresh context with a random request id and no deadline.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            deadline: None,
            transaction: None,
        }
    }

    pub fn with_request_id(&self, request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..self.clone()
        }
    }

    /// Derive a context with `deadline`. An earlier existing deadline wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context carrying `transaction` as the current transaction.
    pub fn with_transaction(&self, transaction: Transaction) -> Self {
        Self {
            transaction: Some(transaction),
            ..self.clone()
        }
    }

    /// The transaction bound to this context.
    ///
    /// # Panics
    ///
    /// Panics if no transaction was bound. Reaching this point without the
    /// middleware is a programming error, not a runtime condition.
    pub fn transaction(&self) -> Transaction {
        match &self.transaction {
            Some(tx) => tx.clone(),
            None => panic!("{}", MISSING_MIDDLEWARE),
        }
    }

    /// The bound transaction, if any.
    pub fn try_transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the deadline, if any, has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Await `fut`, failing with [`DbError::Timeout`] once the deadline passes.
    pub(crate) async fn run<T, F>(&self, operation: &str, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| DbError::timeout(operation))?,
            None => fut.await,
        }
    }
}

impl Default for TxContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The context the middleware stored in `extensions`.
///
/// # Panics
///
/// Panics if the request did not pass through the middleware.
pub fn context_from_extensions(extensions: &Extensions) -> TxContext {
    match extensions.get::<TxContext>() {
        Some(ctx) => ctx.clone(),
        None => panic!("{}", MISSING_MIDDLEWARE),
    }
}

/// The transaction bound to the context stored in `extensions`.
///
/// # Panics
///
/// Panics if the request did not pass through the middleware.
pub fn transaction_from_extensions(extensions: &Extensions) -> Transaction {
    match extensions.get::<TxContext>() {
        Some(ctx) => ctx.transaction(),
        None => panic!("{}", MISSING_MIDDLEWARE),
    }
}

impl<S> FromRequestParts<S> for TxContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(context_from_extensions(&parts.extensions))
    }
}

impl<S> FromRequestParts<S> for Transaction
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(transaction_from_extensions(&parts.extensions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use crate::db::DbPool;

    fn lazy_pool() -> DbPool {
        DbPool::connect_lazy("sqlite::memory:", &PoolOptions::default()).unwrap()
    }

    #[test]
    fn test_new_context_has_unique_request_id() {
        let a = TxContext::new();
        let b = TxContext::new();
        assert_ne!(a.request_id(), b.request_id());
        assert!(a.deadline().is_none());
        assert!(a.try_transaction().is_none());
    }

    #[tokio::test]
    async fn test_with_transaction_leaves_base_context_untouched() {
        let base = TxContext::new();
        let tx = Transaction::with_pool(lazy_pool(), base.clone(), false);
        let bound = base.with_transaction(tx);

        assert!(base.try_transaction().is_none());
        assert!(bound.try_transaction().is_some());
        assert_eq!(bound.request_id(), base.request_id());
        assert_eq!(bound.transaction().context().request_id(), base.request_id());
    }

    #[test]
    #[should_panic(expected = "no transaction in the request context")]
    fn test_lookup_without_binding_panics() {
        TxContext::new().transaction();
    }

    #[test]
    #[should_panic(expected = "wrap the router with TransactionScope")]
    fn test_extensions_without_context_panics() {
        transaction_from_extensions(&Extensions::new());
    }

    #[tokio::test]
    async fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = TxContext::new().with_deadline(now + Duration::from_secs(5));
        let later = ctx.with_deadline(now + Duration::from_secs(60));
        let sooner = ctx.with_deadline(now + Duration::from_secs(1));

        assert_eq!(later.deadline(), Some(now + Duration::from_secs(5)));
        assert_eq!(sooner.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_run_times_out_after_deadline() {
        let ctx = TxContext::new().with_timeout(Duration::from_millis(10));
        let result: DbResult<()> = ctx
            .run("sleep", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert!(ctx.is_expired());
    }

    #[tokio::test]
    async fn test_run_without_deadline_passes_result_through() {
        let ctx = TxContext::new();
        let value = ctx.run("noop", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}

//! Request-scoping middleware.
//!
//! Every request that goes through [`TransactionScope`] gets a fresh
//! [`Transaction`] bound into its [`TxContext`]. The handler commits when it
//! wants its work to stick. Whatever happens afterwards, the middleware rolls
//! back, which is a no-op for a committed or never-started transaction. A
//! panicking handler is answered with a generic `500` instead of tearing down
//! the connection.

mod panic;

use crate::config::debug_enabled_from_env;
use crate::context::TxContext;
use crate::db::{self, DbPool, Transaction};
use crate::error::INTERNAL_ERROR_BODY;
use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Header whose value, when present, becomes the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Settings shared by every request the middleware handles.
#[derive(Debug, Clone)]
pub struct TransactionScope {
    pool: DbPool,
    debug: bool,
    request_timeout: Option<Duration>,
}

impl TransactionScope {
    /// Scope backed by `pool`. Diagnostic mode follows the `DEBUG`
    /// environment toggle.
    ///
    /// Also installs a process-wide panic hook that records where a handler
    /// panicked. A backtrace is only captured when `RUST_BACKTRACE` enables it.
    pub fn new(pool: DbPool) -> Self {
        panic::install_hook();
        Self {
            pool,
            debug: debug_enabled_from_env(),
            request_timeout: None,
        }
    }

    /// Scope backed by the process-wide pool.
    ///
    /// # Panics
    ///
    /// Panics if [`db::configure`] has not been called.
    pub fn global() -> Self {
        match db::global() {
            Some(pool) => Self::new(pool.clone()),
            None => panic!("there is no database connection set; call db::configure first"),
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Bound every request's database work by `timeout`.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Decorate `router` so each of its requests runs in its own scope.
    pub fn wrap<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(axum::middleware::from_fn_with_state(self, transaction_scope))
    }

    fn context_for(&self, req: &Request) -> TxContext {
        let mut ctx = TxContext::new();
        if let Some(id) = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            ctx = ctx.with_request_id(id);
        }
        if let Some(timeout) = self.request_timeout {
            ctx = ctx.with_timeout(timeout);
        }
        ctx
    }
}

/// Middleware function behind [`TransactionScope::wrap`].
pub async fn transaction_scope(
    State(scope): State<TransactionScope>,
    mut req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let path = req.uri().path().to_string();

    let ctx = scope.context_for(&req);
    let tx = Transaction::with_pool(scope.pool.clone(), ctx.clone(), scope.debug);
    req.extensions_mut().insert(ctx.with_transaction(tx.clone()));

    if scope.debug {
        info!(
            request_id = %ctx.request_id(),
            path = %path,
            at = %Utc::now().to_rfc3339(),
            "Request transaction scope opened"
        );
    }

    let outcome = AssertUnwindSafe(next.run(req)).catch_unwind().await;

    tx.rollback().await;

    let response = match outcome {
        Ok(response) => response,
        Err(payload) => {
            let report = panic::take_report(payload.as_ref());
            error!(
                request_id = %ctx.request_id(),
                path = %path,
                message = %report.message,
                location = report.location.as_deref().unwrap_or("<unknown>"),
                backtrace = report.backtrace.as_deref().unwrap_or("<disabled, set RUST_BACKTRACE=1>"),
                "Request handler panicked"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY).into_response()
        }
    };

    if scope.debug {
        info!(
            request_id = %ctx.request_id(),
            path = %path,
            status = response.status().as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            at = %Utc::now().to_rfc3339(),
            "Request transaction scope closed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use axum::body::Body;
    use axum::routing::get;
    use tower::ServiceExt;

    fn scope() -> TransactionScope {
        let pool = DbPool::connect_lazy("sqlite::memory:", &PoolOptions::default()).unwrap();
        TransactionScope::new(pool)
    }

    #[tokio::test]
    async fn test_builder_settings() {
        let scope = scope()
            .with_debug(true)
            .with_request_timeout(Some(Duration::from_secs(3)));
        assert!(scope.is_debug());
        assert_eq!(scope.request_timeout, Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_request_id_header_is_used() {
        let app = scope().wrap(Router::new().route(
            "/",
            get(|ctx: TxContext| async move { ctx.request_id().to_string() }),
        ));

        let req = Request::builder()
            .uri("/")
            .header(REQUEST_ID_HEADER, "abc-123")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"abc-123");
    }

    #[tokio::test]
    async fn test_panic_becomes_generic_500() {
        let app = scope().wrap(Router::new().route(
            "/",
            get(|| async {
                if true {
                    panic!("secret detail");
                }
                "unreachable"
            }),
        ));

        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], INTERNAL_ERROR_BODY.as_bytes());
    }
}

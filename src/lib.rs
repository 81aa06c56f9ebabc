//! txscope
//!
//! Request-scoped database transactions for axum services. Each request gets
//! at most one transaction, started on first use and finished exactly once:
//! committed by the handler, or rolled back by the middleware when the handler
//! returns without committing or panics.
//!
//! ```ignore
//! let pool = txscope::db::configure("host=localhost database=app user=app")?;
//! let app = TransactionScope::new(pool.clone()).wrap(
//!     Router::new().route("/orders", post(|tx: Transaction| async move {
//!         tx.execute("insert into orders default values", &[]).await?;
//!         tx.commit().await
//!     })),
//! );
//! ```

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod transport;

pub use config::{Config, DatabaseConfig};
pub use context::TxContext;
pub use db::{DbPool, DbRow, Transaction};
pub use error::{DbError, DbResult};
pub use middleware::TransactionScope;

//! Database access layer.
//!
//! - Connection pool management and the process-wide pool
//! - Lazily-started, request-scoped transactions
//! - Parameter binding and row decoding
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod row;
pub mod transaction;
pub mod types;

pub use macros::DatabaseType;
pub use pool::{
    DbPool, configure, configure_from_config, configure_with_options, global,
    postgres_connect_options,
};
pub use row::DbRow;
pub use transaction::{DbTransaction, Transaction};
pub use types::RowValues;

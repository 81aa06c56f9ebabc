//! The process-wide pool. Kept in its own test binary: the pool can only be
//! configured once per process.

use std::ptr;
use txscope::context::TxContext;
use txscope::db::{self, DatabaseType, Transaction};
use txscope::middleware::TransactionScope;

#[tokio::test]
async fn test_configure_is_idempotent() {
    assert!(db::global().is_none());

    let first = db::configure("host=localhost port=5432 database=first user=app").unwrap();
    assert_eq!(first.db_type(), DatabaseType::Postgres);

    // Later calls return the first pool and do not look at their argument.
    let second = db::configure("sqlite::memory:").unwrap();
    let third = db::configure("host=localhost port=not-a-port").unwrap();
    assert!(ptr::eq(first, second));
    assert!(ptr::eq(first, third));
    assert_eq!(third.db_type(), DatabaseType::Postgres);
    assert!(ptr::eq(db::global().unwrap(), first));

    // Handles and scopes created without an explicit pool use it.
    let tx = Transaction::new(TxContext::new());
    assert_eq!(tx.pool().db_type(), DatabaseType::Postgres);
    assert!(!tx.is_debug());
    tx.commit().await.unwrap();
    tx.rollback().await;

    let scope = TransactionScope::global();
    assert_eq!(scope.pool().db_type(), DatabaseType::Postgres);
}

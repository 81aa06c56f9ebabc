//! Result rows handed to row handlers.

use crate::db::macros::DatabaseType;
use crate::db::types::RowValues;
use crate::error::DbResult;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Decode, FromRow, Postgres, Row, Sqlite, Type};
use std::fmt;

/// One row of a query result, as seen by a row handler.
///
/// Typed access goes through [`scan`](Self::scan) (the whole row into a tuple
/// or a `#[derive(sqlx::FromRow)]` struct) or [`get`](Self::get) (a single
/// column by position). [`values`](Self::values) gives the untyped view.
pub enum DbRow {
    Postgres(PgRow),
    SQLite(SqliteRow),
}

impl DbRow {
    /// Decode the row positionally into `T`.
    ///
    /// ```ignore
    /// let (id, name): (i64, String) = row.scan()?;
    /// ```
    pub fn scan<T>(&self) -> DbResult<T>
    where
        T: for<'r> FromRow<'r, PgRow> + for<'r> FromRow<'r, SqliteRow>,
    {
        let value = match self {
            DbRow::Postgres(row) => T::from_row(row)?,
            DbRow::SQLite(row) => T::from_row(row)?,
        };
        Ok(value)
    }

    /// Decode the column at `index`.
    pub fn get<T>(&self, index: usize) -> DbResult<T>
    where
        T: for<'r> Decode<'r, Postgres> + Type<Postgres> + for<'r> Decode<'r, Sqlite> + Type<Sqlite>,
    {
        let value = match self {
            DbRow::Postgres(row) => row.try_get(index)?,
            DbRow::SQLite(row) => row.try_get(index)?,
        };
        Ok(value)
    }

    /// Untyped positional values.
    ///
    /// Fails with [`DbError::RowHandler`](crate::error::DbError::RowHandler)
    /// when a column holds a type with no JSON mapping (intervals, arrays,
    /// ranges); read those with [`get`](Self::get) instead.
    pub fn values(&self) -> DbResult<Vec<JsonValue>> {
        match self {
            DbRow::Postgres(row) => row.json_values(),
            DbRow::SQLite(row) => row.json_values(),
        }
    }

    /// Column names in select-list order.
    pub fn columns(&self) -> Vec<String> {
        match self {
            DbRow::Postgres(row) => row.column_names(),
            DbRow::SQLite(row) => row.column_names(),
        }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        match self {
            DbRow::Postgres(row) => row.len(),
            DbRow::SQLite(row) => row.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbRow::Postgres(_) => DatabaseType::Postgres,
            DbRow::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

impl fmt::Debug for DbRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbRow")
            .field("db_type", &self.db_type())
            .field("columns", &self.columns())
            .finish()
    }
}

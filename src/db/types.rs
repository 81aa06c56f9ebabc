//! Untyped decoding of result rows.
//!
//! Row handlers that do not know the column types up front read a row as a
//! list of JSON values. Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Backend-specific decoders handle the actual value extraction
//!
//! Postgres values are decoded from their binary wire form through the
//! matching Rust type; a column type with no mapping here is an error rather
//! than a silent NULL. SQLite values go by the storage class of each value.

use crate::db::macros::DatabaseType;
use crate::error::DbResult;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Oid,
    Unknown,
}

/// Classify a database type name into a logical category.
///
/// Names are matched exactly (case-insensitive): Postgres reports its
/// canonical names (`INT4`, `TIMESTAMPTZ`), SQLite its affinity names
/// (`INTEGER`, `REAL`) or storage classes.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    match type_name.to_ascii_uppercase().as_str() {
        "INT2" | "INT4" | "INT8" | "SMALLINT" | "INT" | "INTEGER" | "BIGINT" => {
            TypeCategory::Integer
        }
        "FLOAT4" | "FLOAT8" | "REAL" | "DOUBLE PRECISION" | "DOUBLE" | "FLOAT" => {
            TypeCategory::Float
        }
        // SQLite's NUMERIC affinity stores integers or floats
        "NUMERIC" | "DECIMAL" if db == DatabaseType::SQLite => TypeCategory::Float,
        "NUMERIC" | "DECIMAL" => TypeCategory::Decimal,
        "BOOL" | "BOOLEAN" => TypeCategory::Boolean,
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => TypeCategory::Text,
        "BYTEA" | "BLOB" => TypeCategory::Binary,
        "JSON" | "JSONB" => TypeCategory::Json,
        "UUID" => TypeCategory::Uuid,
        "DATE" => TypeCategory::Date,
        "TIME" => TypeCategory::Time,
        "TIMESTAMP" | "DATETIME" => TypeCategory::Timestamp,
        "TIMESTAMPTZ" => TypeCategory::TimestampTz,
        "OID" => TypeCategory::Oid,
        _ => TypeCategory::Unknown,
    }
}

/// Encode binary column data as base64 text.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

// =============================================================================
// Row Values Trait
// =============================================================================

/// Positional, untyped view of a result row.
pub trait RowValues {
    /// Column names in select-list order.
    fn column_names(&self) -> Vec<String>;

    /// One JSON value per column, in select-list order. NULL becomes
    /// `JsonValue::Null`; a value that cannot be decoded is an error.
    fn json_values(&self) -> DbResult<Vec<JsonValue>>;
}

impl RowValues for PgRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn json_values(&self) -> DbResult<Vec<JsonValue>> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::Postgres);
                postgres::decode_column(self, idx, category)
            })
            .collect()
    }
}

impl RowValues for SqliteRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn json_values(&self) -> DbResult<Vec<JsonValue>> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let declared = categorize_type(col.type_info().name(), DatabaseType::SQLite);
                sqlite::decode_column(self, idx, declared)
            })
            .collect()
    }
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn string_or_null<T: ToString>(value: Option<T>) -> JsonValue {
    value
        .map(|v| JsonValue::String(v.to_string()))
        .unwrap_or(JsonValue::Null)
}

// =============================================================================
// Backend-Specific Decoders
// =============================================================================

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use sqlx::postgres::types::Oid;
    use sqlx::types::{Decimal, Uuid};

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> DbResult<JsonValue> {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Uuid => Ok(string_or_null(row.try_get::<Option<Uuid>, _>(idx)?)),
            TypeCategory::Date => Ok(string_or_null(row.try_get::<Option<NaiveDate>, _>(idx)?)),
            TypeCategory::Time => Ok(string_or_null(row.try_get::<Option<NaiveTime>, _>(idx)?)),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::TimestampTz => decode_timestamptz(row, idx),
            TypeCategory::Oid => Ok(row
                .try_get::<Option<Oid>, _>(idx)?
                .map(|oid| JsonValue::Number(oid.0.into()))
                .unwrap_or(JsonValue::Null)),
            // Anything else must at least be text-compatible.
            TypeCategory::Text | TypeCategory::Unknown => decode_text(row, idx),
        }
    }

    /// Exact decimal text; the column's scale is kept (`12345.678`, `1.50`).
    fn decode_decimal(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        Ok(string_or_null(row.try_get::<Option<Decimal>, _>(idx)?))
    }

    fn decode_integer(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        let value = match row.column(idx).type_info().name() {
            "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(i64::from),
            "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(i64::from),
            _ => row.try_get::<Option<i64>, _>(idx)?,
        };
        Ok(value
            .map(|v| JsonValue::Number(v.into()))
            .unwrap_or(JsonValue::Null))
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<bool>, _>(idx)?
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null))
    }

    fn decode_float(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        let value = match row.column(idx).type_info().name() {
            "FLOAT4" => row.try_get::<Option<f32>, _>(idx)?.map(f64::from),
            _ => row.try_get::<Option<f64>, _>(idx)?,
        };
        Ok(value.map(float_value).unwrap_or(JsonValue::Null))
    }

    fn decode_binary(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<Vec<u8>>, _>(idx)?
            .map(|v| encode_binary_value(&v))
            .unwrap_or(JsonValue::Null))
    }

    fn decode_json(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<JsonValue>, _>(idx)?
            .unwrap_or(JsonValue::Null))
    }

    fn decode_timestamp(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(|ts| JsonValue::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
            .unwrap_or(JsonValue::Null))
    }

    fn decode_timestamptz(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(|ts| JsonValue::String(ts.to_rfc3339()))
            .unwrap_or(JsonValue::Null))
    }

    fn decode_text(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<String>, _>(idx)?
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null))
    }
}

mod sqlite {
    use super::*;

    /// Decode by the storage class of the value. Declared types only matter
    /// for BOOLEAN columns, whose values are stored as integers.
    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        declared: TypeCategory,
    ) -> DbResult<JsonValue> {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(JsonValue::Null);
        }
        let storage_class = categorize_type(raw.type_info().name(), DatabaseType::SQLite);

        let value = match storage_class {
            TypeCategory::Integer if declared == TypeCategory::Boolean => {
                JsonValue::Bool(row.try_get::<bool, _>(idx)?)
            }
            TypeCategory::Integer => JsonValue::Number(row.try_get::<i64, _>(idx)?.into()),
            TypeCategory::Float => float_value(row.try_get::<f64, _>(idx)?),
            TypeCategory::Binary => encode_binary_value(&row.try_get::<Vec<u8>, _>(idx)?),
            _ => JsonValue::String(row.try_get::<String, _>(idx)?),
        };
        Ok(value)
    }
}

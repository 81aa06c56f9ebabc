//! Demo endpoints.
//!
//! Each handler takes the request's [`Transaction`] as an extractor. Work is
//! only kept when the handler commits; otherwise the middleware rolls it back.

use crate::db::Transaction;
use crate::error::{DbError, DbResult};
use crate::models::{ExecuteRequest, ExecuteResult, QueryRequest, QueryResult};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: String,
}

/// Routes served by the demo binary, without the middleware.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/execute", post(execute))
        .route("/query", post(query))
}

async fn health(tx: Transaction) -> DbResult<Json<HealthResponse>> {
    tx.query_count("select 1", &[]).await?;
    Ok(Json(HealthResponse {
        status: "ok",
        database: tx.pool().db_type().to_string(),
    }))
}

async fn execute(tx: Transaction, Json(req): Json<ExecuteRequest>) -> DbResult<Json<ExecuteResult>> {
    validate_sql(&req.sql)?;
    let start = Instant::now();

    let rows_affected = tx.execute(&req.sql, &req.params).await?;
    if req.commit {
        tx.commit().await?;
    }

    Ok(Json(ExecuteResult {
        rows_affected,
        committed: req.commit,
        execution_time_ms: start.elapsed().as_millis() as u64,
    }))
}

async fn query(tx: Transaction, Json(req): Json<QueryRequest>) -> DbResult<Json<QueryResult>> {
    validate_sql(&req.sql)?;
    let start = Instant::now();

    let mut columns = Vec::new();
    let mut rows = Vec::new();
    let row_count = tx
        .query(&req.sql, &req.params, |row| {
            if columns.is_empty() {
                columns = row.columns();
            }
            rows.push(row.values()?);
            Ok(())
        })
        .await?;

    Ok(Json(QueryResult {
        columns,
        rows,
        row_count,
        execution_time_ms: start.elapsed().as_millis() as u64,
    }))
}

fn validate_sql(sql: &str) -> DbResult<()> {
    if sql.trim().is_empty() {
        return Err(DbError::invalid_input("SQL statement must not be empty"));
    }
    Ok(())
}

//! Data models for txscope.
//!
//! This module re-exports the parameter and request/response types shared by
//! the transaction handle and the HTTP gateway.

pub mod query;

pub use query::{ExecuteRequest, ExecuteResult, QueryParam, QueryRequest, QueryResult};

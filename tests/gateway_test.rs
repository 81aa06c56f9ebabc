//! Tests for the demo gateway routes.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tempfile::NamedTempFile;
use tower::ServiceExt;
use txscope::config::PoolOptions;
use txscope::db::DbPool;
use txscope::middleware::TransactionScope;
use txscope::transport::HttpTransport;

async fn gateway() -> (NamedTempFile, Router) {
    let file = NamedTempFile::new().unwrap();
    let conn_url = format!("sqlite:{}", file.path().display());
    let pool = DbPool::connect(&conn_url, &PoolOptions::default())
        .await
        .unwrap();
    let transport = HttpTransport::new(TransactionScope::new(pool), "127.0.0.1", 0);
    (file, transport.app())
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (_file, app) = gateway().await;
    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "SQLite");
}

#[tokio::test]
async fn test_execute_and_query() {
    let (_file, app) = gateway().await;

    let (status, _) = call(
        &app,
        "POST",
        "/execute",
        Some(json!({"sql": "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)", "commit": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        "POST",
        "/execute",
        Some(json!({
            "sql": "INSERT INTO notes (id, body) VALUES (?, ?)",
            "params": [1, "hello"],
            "commit": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows_affected"], 1);
    assert_eq!(body["committed"], true);

    let (status, body) = call(
        &app,
        "POST",
        "/query",
        Some(json!({"sql": "SELECT id, body FROM notes"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["columns"], json!(["id", "body"]));
    assert_eq!(body["rows"], json!([[1, "hello"]]));
    assert_eq!(body["row_count"], 1);
}

#[tokio::test]
async fn test_execute_without_commit_is_discarded() {
    let (_file, app) = gateway().await;

    call(
        &app,
        "POST",
        "/execute",
        Some(json!({"sql": "CREATE TABLE notes (id INTEGER PRIMARY KEY)", "commit": true})),
    )
    .await;

    let (status, body) = call(
        &app,
        "POST",
        "/execute",
        Some(json!({"sql": "INSERT INTO notes (id) VALUES (1)"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["committed"], false);

    let (_, body) = call(
        &app,
        "POST",
        "/query",
        Some(json!({"sql": "SELECT id FROM notes"})),
    )
    .await;
    assert_eq!(body["row_count"], 0);
}

#[tokio::test]
async fn test_bad_requests() {
    let (_file, app) = gateway().await;

    let (status, _) = call(&app, "POST", "/execute", Some(json!({"sql": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        "POST",
        "/query",
        Some(json!({"sql": "SELECT * FROM missing"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("missing"));
}

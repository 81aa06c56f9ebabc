//! HTTP surface of the txscope demo server.
//!
//! - `routes`: handlers that do their database work through the request
//!   transaction
//! - `http`: listener, graceful shutdown and pool teardown

pub mod http;
pub mod routes;

pub use http::HttpTransport;
pub use routes::router;

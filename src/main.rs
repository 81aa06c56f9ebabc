//! txscope demo server - Main entry point.
//!
//! Serves a small SQL gateway in which every request runs in its own lazily
//! started transaction.

use clap::Parser;
use txscope::config::Config;
use txscope::db;
use txscope::middleware::TransactionScope;
use txscope::transport::HttpTransport;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    info!("Starting txscope v{}", env!("CARGO_PKG_VERSION"));

    let pool = match db::configure_with_options(&config.connection_string(), &config.pool_options())
    {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "Invalid database configuration");
            return Err(e.into());
        }
    };
    info!(db_type = %pool.db_type(), "Database pool ready");

    let scope = TransactionScope::new(pool.clone())
        .with_debug(config.debug_enabled())
        .with_request_timeout(config.request_timeout_duration());
    if scope.is_debug() {
        info!("Diagnostic mode enabled");
    }

    let transport = HttpTransport::new(scope, &config.http_host, config.http_port);
    if let Err(e) = transport.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

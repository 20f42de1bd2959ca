//! Application entry point for the `fleet-locator` backend service.
//!
//! This binary orchestrates the full startup sequence for the vehicle
//! location API, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool and a Redis connection
//! - Creating the database schema if it does not exist
//! - Building the store, cache and publisher collaborators and injecting
//!   them into the ingestion and retrieval services
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `REDIS_URL` (**required**) – Redis connection string
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `CACHE_TTL_SECS` (optional) – cache entry expiry (default: 300)
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the remaining tunables.
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP) by
//! delegating schema setup to `schema`, configuration parsing to `config`,
//! and route registration to `routes`.
use std::{env, net::SocketAddr, sync::Arc};

use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

mod cache;
mod config;
mod error;
mod fallback;
mod ingest;
mod models;
mod publisher;
mod retrieval;
mod routes;
mod schema;
mod store;
mod validator;

#[cfg(test)]
mod testing;

pub use config::Config;

// Re-exported so sibling modules import domain types from the crate root
// rather than from each other's files.
pub use error::{IngestError, Outcome, RetrievalError};
pub use ingest::IngestionService;
pub use models::{
    fleet_pattern, Axes, CacheEntry, HistoryEntry, IdentityTriple, Position, TelemetryReport,
    VehicleLocation, VehicleRecord,
};
pub use retrieval::RetrievalService;

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let redis_client = redis::Client::open(cfg.redis_url.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid REDIS_URL: {}", e))?;
    let redis = redis::aio::ConnectionManager::new(redis_client)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {}", e))?;

    tracing::info!("Successfully connected to Redis");

    // Collaborators are built here and injected; services own no clients.
    let store: Arc<dyn store::LocationStore> = Arc::new(store::PgLocationStore::new(pool));
    let cache: Arc<dyn cache::PositionCache> = Arc::new(cache::RedisPositionCache::new(
        redis.clone(),
        cfg.cache_scan_count,
    ));
    // Ingestion retries publishes; reads publish once and move on.
    let ingest_publisher: Arc<dyn publisher::UpdatePublisher> =
        Arc::new(publisher::RetryingPublisher::new(
            publisher::RedisPublisher::new(redis.clone()),
            cfg.publish_max_attempts,
            cfg.publish_backoff(),
        ));
    let read_publisher: Arc<dyn publisher::UpdatePublisher> =
        Arc::new(publisher::RedisPublisher::new(redis));

    let ingestion = Arc::new(IngestionService::new(
        store.clone(),
        cache.clone(),
        ingest_publisher,
        cfg.cache_ttl_secs,
    ));
    let retrieval = Arc::new(RetrievalService::new(
        store,
        cache,
        read_publisher,
        cfg.cache_ttl_secs,
    ));

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(ingestion, retrieval);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `AXUM_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AXUM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,redis=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}

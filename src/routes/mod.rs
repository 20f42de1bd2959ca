use std::sync::Arc;

use axum::Router;

use crate::{IngestionService, RetrievalService};

mod health;
mod telemetry;
mod vehicles;

// ---

/// Shared handler state: the two services, built once in `main.rs`.
pub type AppState = (Arc<IngestionService>, Arc<RetrievalService>);

pub fn router(ingestion: Arc<IngestionService>, retrieval: Arc<RetrievalService>) -> Router {
    // ---
    Router::new()
        .merge(telemetry::router())
        .merge(vehicles::router())
        .merge(health::router())
        .with_state((ingestion, retrieval))
}

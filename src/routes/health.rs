//! `GET /health` liveness check.
//!
//! Answers from process state only. Postgres and Redis are not contacted,
//! so a degraded cache or a slow pool never fails the check; per-sink
//! trouble shows up in the ingestion outcomes instead.

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// Body returned by the check.
#[derive(Debug, Serialize, PartialEq)]
struct HealthBody {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

fn health_body() -> HealthBody {
    HealthBody {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    }
}

async fn health() -> Json<HealthBody> {
    Json(health_body())
}

/// Subrouter with the check; generic so it merges under any gateway state.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_health_body_names_service() {
        // ---
        let body = serde_json::to_value(health_body()).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "fleet-locator");
        assert!(body["version"].as_str().is_some_and(|v| !v.is_empty()));
    }
}

use axum::{
    body::Bytes, extract::State, http::StatusCode, response::IntoResponse, routing::post, Json,
    Router,
};
use serde::Serialize;
use tracing::{debug, error, info};

use super::AppState;
use crate::{IngestError, TelemetryReport};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/telemetry", post(handler))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: &'static str,
    error: String,
}

/// Handle `POST /telemetry`.
///
/// 200 carries the composite per-sink result even when cache or publish
/// failed; 500 means the history append failed; 400 means nothing was
/// attempted.
async fn handler(State((ingestion, _)): State<AppState>, body: Bytes) -> impl IntoResponse {
    // ---
    info!("POST /telemetry - {} bytes", body.len());

    let report = match parse_report(&body) {
        Ok(report) => report,
        Err(e) => return rejected(e),
    };

    match ingestion.ingest(report).await {
        Ok(report) if report.persisted() => {
            debug!("POST /telemetry - Returning OK");
            (StatusCode::OK, Json(report)).into_response()
        }
        Ok(report) => {
            error!("POST /telemetry - history append failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(report)).into_response()
        }
        Err(e) => rejected(e),
    }
}

fn parse_report(body: &[u8]) -> Result<TelemetryReport, IngestError> {
    // ---
    serde_json::from_slice(body).map_err(|e| IngestError::MalformedPayload(e.to_string()))
}

fn rejected(e: IngestError) -> axum::response::Response {
    // ---
    error!("POST /telemetry - rejected: {}", e);
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: "Error processing data",
            error: e.to_string(),
        }),
    )
        .into_response()
}

//! Domain errors and per-sink outcomes.

use serde::Serialize;
use thiserror::Error;

// ---

/// Rejections raised before any side effect is attempted.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid data: device_id is required")]
    MissingDeviceId,

    #[error("Invalid data: {0}")]
    MalformedPayload(String),
}

/// Failures that abort a location read.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("store query failed: {0:#}")]
    Store(anyhow::Error),
}

/// Result of one independent sink (history, vehicle, cache, publish).
///
/// Serialized untagged, so the response body holds either the success
/// payload, `{"message": ..}` for a skipped sink or `{"error": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome<T> {
    Done(T),
    Skipped { message: String },
    Failed { error: String },
}

impl<T> Outcome<T> {
    pub fn skipped(message: impl Into<String>) -> Self {
        Outcome::Skipped {
            message: message.into(),
        }
    }

    /// Capture a collaborator result without propagating its error.
    pub fn settle(result: anyhow::Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Done(value),
            Err(e) => Outcome::Failed {
                error: format!("{e:#}"),
            },
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    #[cfg(test)]
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    #[cfg(test)]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped { .. })
    }
}

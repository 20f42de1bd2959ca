//! Last-known-good position lookup.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::{store::LocationStore, validator, HistoryEntry};

// ---

/// Substitutes the newest usable history row when a report has no fix.
///
/// A failed query is logged and reported as "nothing found": callers never
/// see the difference, and no retry happens here.
pub struct FallbackResolver {
    store: Arc<dyn LocationStore>,
}

impl FallbackResolver {
    pub fn new(store: Arc<dyn LocationStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn resolve_last_known(&self, device_id: &str) -> Option<HistoryEntry> {
        // ---
        let entry = match self.store.latest_usable_position(device_id).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "fallback lookup failed");
                return None;
            }
        };

        // A substitute must itself pass validation.
        match entry {
            Some(entry) if entry.position().is_some_and(validator::is_usable_numeric) => {
                debug!(history_id = entry.id, "last known position found");
                Some(entry)
            }
            Some(entry) => {
                warn!(history_id = entry.id, "store returned an unusable fallback row");
                None
            }
            None => {
                debug!("no usable history for device");
                None
            }
        }
    }
}

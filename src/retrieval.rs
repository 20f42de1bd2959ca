//! Location reads for one vehicle or a whole organization.
//!
//! Reads prefer the cache. On a miss the store is queried and every row it
//! returns is written back to the cache and re-published, so the next read
//! for the same key is served without touching the store.
//!
//! Fleet reads are all-or-nothing: if the SCAN finds any key for the
//! organization the listing comes entirely from cache (expired keys become
//! key-only rows), otherwise it comes entirely from the store.
//!
//! Write-throughs for a fleet run concurrently. The publisher handed in here
//! is expected to make a single attempt per call.

use std::{iter, sync::Arc};

use futures_util::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::{
    cache::{self, PositionCache},
    fleet_pattern,
    publisher::UpdatePublisher,
    store::LocationStore,
    validator, IdentityTriple, Position, RetrievalError, VehicleLocation, VehicleRecord,
};

// ---

pub struct RetrievalService {
    store: Arc<dyn LocationStore>,
    cache: Arc<dyn PositionCache>,
    publisher: Arc<dyn UpdatePublisher>,
    cache_ttl_secs: u64,
}

impl RetrievalService {
    pub fn new(
        store: Arc<dyn LocationStore>,
        cache: Arc<dyn PositionCache>,
        publisher: Arc<dyn UpdatePublisher>,
        cache_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            cache,
            publisher,
            cache_ttl_secs,
        }
    }

    /// Current position of one vehicle; `None` when it has no stored fix.
    #[instrument(skip(self), fields(key = %identity))]
    pub async fn get(
        &self,
        identity: &IdentityTriple,
    ) -> Result<Option<VehicleLocation>, RetrievalError> {
        // ---
        let key = identity.cache_key();

        match cache::read_entry(self.cache.as_ref(), &key).await {
            Ok(Some(entry)) => {
                debug!("cache hit");
                return Ok(Some(VehicleLocation::from_cache(key, Some(entry))));
            }
            Ok(None) => debug!("cache miss"),
            Err(e) => warn!(error = %format!("{e:#}"), "cache read failed, using store"),
        }

        let Some(record) = self
            .store
            .get_vehicle(identity)
            .await
            .map_err(RetrievalError::Store)?
        else {
            debug!("vehicle has no stored position");
            return Ok(None);
        };

        self.write_through(&record).await;
        Ok(Some(VehicleLocation::from_record(&record)))
    }

    /// Every positioned vehicle of the organization.
    #[instrument(skip(self))]
    pub async fn list_by_org(&self, org_id: i64) -> Result<Vec<VehicleLocation>, RetrievalError> {
        // ---
        if let Some(rows) = self.list_from_cache(org_id).await {
            info!(rows = rows.len(), "fleet served from cache");
            return Ok(rows);
        }

        let records = self
            .store
            .list_vehicles(org_id)
            .await
            .map_err(RetrievalError::Store)?;

        join_all(records.iter().map(|record| self.write_through(record))).await;

        info!(rows = records.len(), "fleet served from store");
        Ok(records.iter().map(VehicleLocation::from_record).collect())
    }

    /// `None` means "go to the store": no keys, or the cache failed.
    async fn list_from_cache(&self, org_id: i64) -> Option<Vec<VehicleLocation>> {
        // ---
        let pattern = fleet_pattern(org_id);

        let keys = match cache::scan_keys(self.cache.as_ref(), &pattern).await {
            Ok(keys) if keys.is_empty() => return None,
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "cache scan failed, using store");
                return None;
            }
        };

        let values = match self.cache.batch_get(&keys).await {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %format!("{e:#}"), keys = keys.len(), "cache batch get failed, using store");
                return None;
            }
        };

        if values.len() != keys.len() {
            warn!(
                keys = keys.len(),
                values = values.len(),
                "batch get returned a misaligned result"
            );
        }

        // Pad so every scanned key yields exactly one row, in scan order.
        let rows = keys
            .into_iter()
            .zip(values.into_iter().chain(iter::repeat(None)))
            .map(|(key, raw)| {
                let entry = cache::decode_entry(&key, raw);
                VehicleLocation::from_cache(key, entry)
            })
            .collect();
        Some(rows)
    }

    /// Best-effort cache refresh and publish for a row read from the store.
    async fn write_through(&self, record: &VehicleRecord) {
        // ---
        let key = record.identity().cache_key();
        let position = Position {
            latitude: record.latitude,
            longitude: record.longitude,
        };
        if !validator::is_usable_numeric(position) {
            warn!(key = %key, "stored position is not usable, not caching");
            return;
        }

        let entry = record.cache_entry();
        let write = cache::write_entry(self.cache.as_ref(), &key, &entry, self.cache_ttl_secs);
        let publish = async {
            let payload = serde_json::to_string(&entry)?;
            self.publisher.publish(&key, &payload).await
        };

        let (written, published) = tokio::join!(write, publish);
        if let Err(e) = written {
            warn!(key = %key, error = %format!("{e:#}"), "cache write-through failed");
        }
        if let Err(e) = published {
            warn!(key = %key, error = %format!("{e:#}"), "publish of refreshed position failed");
        }
    }
}

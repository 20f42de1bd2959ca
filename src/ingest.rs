//! Telemetry ingestion: validate, substitute, persist, cache and publish.
//!
//! Per report the service walks
//! `Received -> Validated -> {PositionResolved | PositionAbsent} -> Persisted
//! -> {CachePublished | CacheSkipped} -> Completed`.
//!
//! The history append starts as soon as the device id is known and runs
//! alongside identity lookup, validation and fallback. Once a usable
//! position and the full identity triple are known, the vehicle row update,
//! the cache write and the publish run concurrently. Every sink settles on
//! its own: one failing never cancels or rolls back another, and only a
//! failed history append makes the ingestion as a whole unsuccessful.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn, Span};

use crate::{
    cache::{self, PositionCache},
    fallback::FallbackResolver,
    publisher::UpdatePublisher,
    store::LocationStore,
    validator, Axes, CacheEntry, HistoryEntry, IdentityTriple, IngestError, Outcome, Position,
    TelemetryReport,
};

// ---

const NO_POSITION: &str = "Skipped: no usable position available";
const NO_IDENTITY: &str = "Skipped: vehicle identity could not be resolved for device";

/// Where the adopted position came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSource {
    Reported,
    Fallback,
}

/// The position an ingestion settled on, with the telemetry that came with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPosition {
    // ---
    pub source: PositionSource,
    pub latitude: String,
    pub longitude: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub satellites: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_gnss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gyroscope: Option<Axes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerometer: Option<Axes>,
    #[serde(skip)]
    pub position: Position,
}

impl ResolvedPosition {
    /// Incoming coordinates are kept as sent. A device clock ahead of ours
    /// is capped at `received_at`.
    fn reported(report: &TelemetryReport, position: Position, received_at: DateTime<Utc>) -> Self {
        // ---
        Self {
            source: PositionSource::Reported,
            latitude: report.latitude.clone().unwrap_or_default(),
            longitude: report.longitude.clone().unwrap_or_default(),
            timestamp: report
                .timestamp
                .map_or(received_at, |sent| sent.min(received_at)),
            speed: report.speed.clone(),
            satellites: report.satellites,
            raw_gnss: report.raw_gnss.clone(),
            temperature: report.temperature,
            gyroscope: report.gyroscope,
            accelerometer: report.accelerometer,
            position,
        }
    }

    fn from_history(entry: HistoryEntry) -> Option<Self> {
        // ---
        let position = entry.position()?;
        Some(Self {
            source: PositionSource::Fallback,
            latitude: position.latitude.to_string(),
            longitude: position.longitude.to_string(),
            timestamp: entry.captured_at,
            gyroscope: Some(entry.gyroscope()),
            accelerometer: Some(entry.accelerometer()),
            speed: entry.speed,
            satellites: entry.satellites,
            raw_gnss: entry.raw_gnss,
            temperature: entry.temperature,
            position,
        })
    }

    pub fn cache_entry(&self) -> CacheEntry {
        CacheEntry {
            latitude: self.latitude.clone(),
            longitude: self.longitude.clone(),
            timestamp: Some(self.timestamp),
            speed: self.speed.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryWrite {
    pub success: bool,
    pub message: &'static str,
    pub insert_id: i64,
}

impl HistoryWrite {
    fn new(insert_id: i64) -> Self {
        Self {
            success: true,
            message: "Data saved to database successfully",
            insert_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleWrite {
    pub rows_affected: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheWrite {
    pub key: String,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishReceipt {
    pub success: bool,
    pub channel: String,
}

/// Composite result of one ingestion; each sink is reported independently.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    // ---
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub position: Option<ResolvedPosition>,
    pub database: Outcome<HistoryWrite>,
    pub vehicle: Outcome<VehicleWrite>,
    pub cache: Outcome<CacheWrite>,
    pub publish: Outcome<PublishReceipt>,
}

impl IngestionReport {
    /// The history append is the only sink whose failure fails the ingestion.
    pub fn persisted(&self) -> bool {
        self.database.is_done()
    }
}

type FanOut = (
    Outcome<VehicleWrite>,
    Outcome<CacheWrite>,
    Outcome<PublishReceipt>,
);

pub struct IngestionService {
    store: Arc<dyn LocationStore>,
    cache: Arc<dyn PositionCache>,
    publisher: Arc<dyn UpdatePublisher>,
    fallback: FallbackResolver,
    cache_ttl_secs: u64,
}

impl IngestionService {
    pub fn new(
        store: Arc<dyn LocationStore>,
        cache: Arc<dyn PositionCache>,
        publisher: Arc<dyn UpdatePublisher>,
        cache_ttl_secs: u64,
    ) -> Self {
        Self {
            fallback: FallbackResolver::new(store.clone()),
            store,
            cache,
            publisher,
            cache_ttl_secs,
        }
    }

    #[instrument(skip(self, report), fields(device_id))]
    pub async fn ingest(&self, report: TelemetryReport) -> Result<IngestionReport, IngestError> {
        // ---
        let device_id = report
            .device_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(IngestError::MissingDeviceId)?
            .to_string();
        Span::current().record("device_id", device_id.as_str());

        let received_at = Utc::now();
        debug!(latitude = ?report.latitude, longitude = ?report.longitude, "received");

        let persist = async {
            let outcome = Outcome::settle(self.store.insert_history(&report).await.map(HistoryWrite::new));
            if let Outcome::Failed { error } = &outcome {
                warn!(error = %error, "history append failed");
            }
            outcome
        };

        let resolve_and_fan_out = async {
            let identity = self.resolve_identity(&device_id, &report).await;
            let resolved = self.resolve_position(&device_id, &report, received_at).await;
            let outcomes = match (&resolved, &identity) {
                (Some(resolved), Some(identity)) => self.fan_out(identity, resolved).await,
                (None, _) => skipped_fan_out(NO_POSITION),
                (Some(_), None) => skipped_fan_out(NO_IDENTITY),
            };
            (identity, resolved, outcomes)
        };

        let (database, (identity, position, (vehicle, cache, publish))) =
            tokio::join!(persist, resolve_and_fan_out);

        let report = IngestionReport {
            message: "Processing complete",
            key: identity.map(|identity| identity.cache_key()),
            position,
            database,
            vehicle,
            cache,
            publish,
        };

        info!(
            persisted = report.persisted(),
            cached = report.cache.is_done(),
            published = report.publish.is_done(),
            "completed"
        );
        Ok(report)
    }

    /// Caller-supplied ids win; otherwise look the device up. A missing or
    /// failed lookup only disables caching and publishing.
    async fn resolve_identity(
        &self,
        device_id: &str,
        report: &TelemetryReport,
    ) -> Option<IdentityTriple> {
        // ---
        if let (Some(org_id), Some(vehicle_id)) = (report.org_id, report.vehicle_id) {
            return Some(IdentityTriple::new(org_id, vehicle_id, device_id));
        }

        match self.store.resolve_identity(device_id).await {
            Ok(Some((org_id, vehicle_id))) => {
                Some(IdentityTriple::new(org_id, vehicle_id, device_id))
            }
            Ok(None) => {
                warn!("no vehicle is provisioned for device");
                None
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "vehicle identity lookup failed");
                None
            }
        }
    }

    async fn resolve_position(
        &self,
        device_id: &str,
        report: &TelemetryReport,
        received_at: DateTime<Utc>,
    ) -> Option<ResolvedPosition> {
        // ---
        if let Some(position) =
            validator::usable_position(report.latitude.as_deref(), report.longitude.as_deref())
        {
            debug!("validated");
            return Some(ResolvedPosition::reported(report, position, received_at));
        }

        warn!(
            latitude = ?report.latitude,
            longitude = ?report.longitude,
            "invalid or missing coordinates, trying last known position"
        );

        let resolved = self
            .fallback
            .resolve_last_known(device_id)
            .await
            .and_then(ResolvedPosition::from_history);

        match &resolved {
            Some(resolved) => info!(
                latitude = %resolved.latitude,
                longitude = %resolved.longitude,
                "adopted last known position"
            ),
            None => info!("no usable position available"),
        }
        resolved
    }

    async fn fan_out(&self, identity: &IdentityTriple, resolved: &ResolvedPosition) -> FanOut {
        // ---
        let key = identity.cache_key();
        let entry = resolved.cache_entry();

        let vehicle = async {
            self.store
                .update_vehicle_position(identity, resolved.position, resolved.timestamp)
                .await
                .map(|rows_affected| VehicleWrite { rows_affected })
        };

        let cache_write = async {
            cache::write_entry(self.cache.as_ref(), &key, &entry, self.cache_ttl_secs)
                .await
                .map(|()| CacheWrite {
                    key: key.clone(),
                    ttl_seconds: self.cache_ttl_secs,
                })
        };

        let publish = async {
            let payload = serde_json::to_string(&entry)?;
            self.publisher.publish(&key, &payload).await?;
            Ok::<_, anyhow::Error>(PublishReceipt {
                success: true,
                channel: key.clone(),
            })
        };

        let (vehicle, cache_write, publish) = tokio::join!(vehicle, cache_write, publish);

        for (sink, result) in [
            ("vehicle", vehicle.as_ref().err()),
            ("cache", cache_write.as_ref().err()),
            ("publish", publish.as_ref().err()),
        ] {
            if let Some(e) = result {
                warn!(sink, key = %key, error = %format!("{e:#}"), "sink failed");
            }
        }

        (
            Outcome::settle(vehicle),
            Outcome::settle(cache_write),
            Outcome::settle(publish),
        )
    }
}

fn skipped_fan_out(reason: &str) -> FanOut {
    info!(reason, "cache and publish skipped");
    (
        Outcome::skipped(reason),
        Outcome::skipped(reason),
        Outcome::skipped(reason),
    )
}

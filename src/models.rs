//! Data models for the location pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---

/// Raw telemetry report as posted by a tracked device.
///
/// Coordinates and speed arrive as strings from most firmware, but some
/// gateways send plain JSON numbers; both are accepted and kept as text so
/// the history row records what was received.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryReport {
    // ---
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub latitude: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub longitude: Option<String>,
    #[serde(default, alias = "Speed", deserialize_with = "lenient_text")]
    pub speed: Option<String>,
    #[serde(default, alias = "numberOfSatellites")]
    pub satellites: Option<i32>,
    #[serde(default, alias = "RawData")]
    pub raw_gnss: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default, alias = "Gyroscope")]
    pub gyroscope: Option<Axes>,
    #[serde(default, alias = "Accelerometer")]
    pub accelerometer: Option<Axes>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Identity hints; looked up from the vehicle table when absent.
    #[serde(default)]
    pub org_id: Option<i64>,
    #[serde(default)]
    pub vehicle_id: Option<i64>,
}

/// Three-axis sensor sample (gyroscope or accelerometer).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    // ---
    #[serde(default, alias = "xAxis")]
    pub x: Option<f64>,
    #[serde(default, alias = "yAxis")]
    pub y: Option<f64>,
    #[serde(default, alias = "zAxis")]
    pub z: Option<f64>,
}

/// A coordinate pair that passed validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// `(organization, vehicle, device)`: the key for cache entries and publish topics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityTriple {
    pub org_id: i64,
    pub vehicle_id: i64,
    pub device_id: String,
}

impl IdentityTriple {
    pub fn new(org_id: i64, vehicle_id: i64, device_id: impl Into<String>) -> Self {
        Self {
            org_id,
            vehicle_id,
            device_id: device_id.into(),
        }
    }

    /// Rendered as `org:vehicle:device`; doubles as the publish topic.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for IdentityTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.org_id, self.vehicle_id, self.device_id)
    }
}

/// SCAN pattern matching every cache key owned by an organization.
pub fn fleet_pattern(org_id: i64) -> String {
    format!("{org_id}:*:*")
}

/// One row of the append-only `location_data` history.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct HistoryEntry {
    // ---
    pub id: i64,
    pub device_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed: Option<String>,
    pub satellites: Option<i32>,
    pub raw_gnss: Option<String>,
    pub temperature: Option<f64>,
    pub gyro_x: Option<f64>,
    pub gyro_y: Option<f64>,
    pub gyro_z: Option<f64>,
    pub accel_x: Option<f64>,
    pub accel_y: Option<f64>,
    pub accel_z: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// The stored coordinate pair, if both halves were recorded.
    pub fn position(&self) -> Option<Position> {
        Some(Position {
            latitude: self.latitude?,
            longitude: self.longitude?,
        })
    }

    pub fn gyroscope(&self) -> Axes {
        Axes {
            x: self.gyro_x,
            y: self.gyro_y,
            z: self.gyro_z,
        }
    }

    pub fn accelerometer(&self) -> Axes {
        Axes {
            x: self.accel_x,
            y: self.accel_y,
            z: self.accel_z,
        }
    }
}

/// Current-state row of the `vehicles` table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct VehicleRecord {
    // ---
    pub id: i64,
    pub organization_id: i64,
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub vehicle_number: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub is_deleted: bool,
    pub updated_at: DateTime<Utc>,
}

impl VehicleRecord {
    pub fn identity(&self) -> IdentityTriple {
        IdentityTriple::new(self.organization_id, self.id, self.device_id.clone())
    }

    /// Position as it is cached and published.
    pub fn cache_entry(&self) -> CacheEntry {
        CacheEntry {
            latitude: self.latitude.to_string(),
            longitude: self.longitude.to_string(),
            timestamp: Some(self.updated_at),
            speed: None,
        }
    }
}

/// Cached projection of a vehicle position; always written as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    // ---
    pub latitude: String,
    pub longitude: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
}

/// Vehicle metadata attached to rows served from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleDetails {
    // ---
    pub vehicle_id: String,
    pub device_id: String,
    pub org_id: String,
    pub vehicle_number: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
}

/// One row of a location read.
///
/// Rows served from cache carry only the cached fields; a key whose value
/// vanished between SCAN and MGET is returned with just its `key`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleLocation {
    // ---
    pub key: String,
    #[serde(flatten)]
    pub entry: Option<CacheEntry>,
    #[serde(flatten)]
    pub details: Option<VehicleDetails>,
}

impl VehicleLocation {
    pub fn from_cache(key: String, entry: Option<CacheEntry>) -> Self {
        Self {
            key,
            entry,
            details: None,
        }
    }

    pub fn from_record(record: &VehicleRecord) -> Self {
        Self {
            key: record.identity().cache_key(),
            entry: Some(record.cache_entry()),
            details: Some(VehicleDetails {
                vehicle_id: record.id.to_string(),
                device_id: record.device_id.clone(),
                org_id: record.organization_id.to_string(),
                vehicle_number: record.vehicle_number.clone(),
                make: record.make.clone(),
                model: record.model.clone(),
                year: record.year,
            }),
        }
    }
}

/// Accept a JSON string or number as text; `null` and absent map to `None`.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    // ---
    use serde::de::Error;

    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

//! Location store: append-only telemetry history plus the current position
//! of every provisioned vehicle.
//!
//! The service only talks to [`LocationStore`]; [`PgLocationStore`] is the
//! PostgreSQL implementation wired up in `main.rs`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument};

use crate::{HistoryEntry, IdentityTriple, Position, TelemetryReport, VehicleRecord};

// ---

/// Persistence operations used by ingestion and retrieval.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Append the report verbatim to history and return the new row id.
    async fn insert_history(&self, report: &TelemetryReport) -> Result<i64>;

    /// Most recent history row for the device whose position is usable.
    async fn latest_usable_position(&self, device_id: &str) -> Result<Option<HistoryEntry>>;

    /// `(organization_id, vehicle_id)` of the live vehicle carrying the device.
    async fn resolve_identity(&self, device_id: &str) -> Result<Option<(i64, i64)>>;

    /// Live vehicle matching the triple, only if it holds a usable position.
    async fn get_vehicle(&self, identity: &IdentityTriple) -> Result<Option<VehicleRecord>>;

    /// Overwrite the vehicle's position unless the stored one is newer.
    /// Returns the number of rows changed.
    async fn update_vehicle_position(
        &self,
        identity: &IdentityTriple,
        position: Position,
        observed_at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Live vehicles of the organization that hold a usable position.
    async fn list_vehicles(&self, org_id: i64) -> Result<Vec<VehicleRecord>>;
}

/// PostgreSQL-backed [`LocationStore`].
#[derive(Clone)]
pub struct PgLocationStore {
    pool: PgPool,
}

impl PgLocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const VEHICLE_COLUMNS: &str = "id, organization_id, device_id, latitude, longitude, \
     vehicle_number, make, model, year, is_deleted, updated_at";

const USABLE_POSITION: &str = "latitude IS NOT NULL AND longitude IS NOT NULL \
     AND latitude <> 0 AND longitude <> 0 \
     AND latitude BETWEEN -90 AND 90 AND longitude BETWEEN -180 AND 180";

#[async_trait]
impl LocationStore for PgLocationStore {
    #[instrument(skip(self, report), fields(device_id = ?report.device_id))]
    async fn insert_history(&self, report: &TelemetryReport) -> Result<i64> {
        // ---
        let gyro = report.gyroscope.unwrap_or_default();
        let accel = report.accelerometer.unwrap_or_default();

        let (id,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO location_data (
                device_id, latitude, longitude, speed, satellites, raw_gnss,
                temperature, gyro_x, gyro_y, gyro_z, accel_x, accel_y, accel_z,
                captured_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING id
            "#,
        )
        .bind(report.device_id.as_deref())
        .bind(stored_coordinate(report.latitude.as_deref()))
        .bind(stored_coordinate(report.longitude.as_deref()))
        .bind(report.speed.as_deref())
        .bind(report.satellites)
        .bind(report.raw_gnss.as_deref())
        .bind(report.temperature)
        .bind(gyro.x)
        .bind(gyro.y)
        .bind(gyro.z)
        .bind(accel.x)
        .bind(accel.y)
        .bind(accel.z)
        .bind(report.timestamp.unwrap_or_else(Utc::now))
        .fetch_one(&self.pool)
        .await
        .context("INSERT INTO location_data")?;

        debug!(id, "history row appended");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn latest_usable_position(&self, device_id: &str) -> Result<Option<HistoryEntry>> {
        // ---
        let sql = format!(
            r#"
            SELECT id, device_id, latitude, longitude, speed, satellites, raw_gnss,
                   temperature, gyro_x, gyro_y, gyro_z, accel_x, accel_y, accel_z,
                   captured_at
            FROM location_data
            WHERE device_id = $1 AND {USABLE_POSITION}
            ORDER BY captured_at DESC
            LIMIT 1
            "#
        );

        sqlx::query_as::<_, HistoryEntry>(&sql)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await
            .context("SELECT latest usable location_data row")
    }

    #[instrument(skip(self))]
    async fn resolve_identity(&self, device_id: &str) -> Result<Option<(i64, i64)>> {
        // ---
        sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT organization_id, id
            FROM vehicles
            WHERE device_id = $1 AND is_deleted = FALSE
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .context("SELECT vehicle identity")
    }

    #[instrument(skip(self), fields(key = %identity))]
    async fn get_vehicle(&self, identity: &IdentityTriple) -> Result<Option<VehicleRecord>> {
        // ---
        let sql = format!(
            r#"
            SELECT {VEHICLE_COLUMNS}
            FROM vehicles
            WHERE organization_id = $1 AND id = $2 AND device_id = $3
              AND is_deleted = FALSE AND {USABLE_POSITION}
            "#
        );

        sqlx::query_as::<_, VehicleRecord>(&sql)
            .bind(identity.org_id)
            .bind(identity.vehicle_id)
            .bind(&identity.device_id)
            .fetch_optional(&self.pool)
            .await
            .context("SELECT vehicle")
    }

    #[instrument(skip(self), fields(key = %identity))]
    async fn update_vehicle_position(
        &self,
        identity: &IdentityTriple,
        position: Position,
        observed_at: DateTime<Utc>,
    ) -> Result<u64> {
        // ---
        let result = sqlx::query(
            r#"
            UPDATE vehicles
            SET latitude = $4, longitude = $5, updated_at = $6
            WHERE organization_id = $1 AND id = $2 AND device_id = $3
              AND is_deleted = FALSE AND updated_at <= $6
            "#,
        )
        .bind(identity.org_id)
        .bind(identity.vehicle_id)
        .bind(&identity.device_id)
        .bind(position.latitude)
        .bind(position.longitude)
        .bind(observed_at)
        .execute(&self.pool)
        .await
        .context("UPDATE vehicles position")?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn list_vehicles(&self, org_id: i64) -> Result<Vec<VehicleRecord>> {
        // ---
        let sql = format!(
            r#"
            SELECT {VEHICLE_COLUMNS}
            FROM vehicles
            WHERE organization_id = $1 AND is_deleted = FALSE AND {USABLE_POSITION}
            ORDER BY id
            "#
        );

        sqlx::query_as::<_, VehicleRecord>(&sql)
            .bind(org_id)
            .fetch_all(&self.pool)
            .await
            .context("SELECT vehicles for organization")
    }
}

/// Numeric form of a wire coordinate for the history row.
///
/// History keeps whatever parsed, including zero and out-of-range values;
/// text that is not a finite number is stored as NULL.
pub(crate) fn stored_coordinate(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

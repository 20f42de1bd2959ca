//! Database schema management for `fleet-locator`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the append-only `location_data` history table and the
/// `vehicles` current-state table. Vehicles are provisioned by other
/// services; this one only moves their position. Safe to call on every
/// startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Raw telemetry, one row per report, never updated
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS location_data (
            id           BIGSERIAL PRIMARY KEY,
            device_id    TEXT             NOT NULL,
            latitude     DOUBLE PRECISION,
            longitude    DOUBLE PRECISION,
            speed        TEXT,
            satellites   INTEGER,
            raw_gnss     TEXT,
            temperature  DOUBLE PRECISION,
            gyro_x       DOUBLE PRECISION,
            gyro_y       DOUBLE PRECISION,
            gyro_z       DOUBLE PRECISION,
            accel_x      DOUBLE PRECISION,
            accel_y      DOUBLE PRECISION,
            accel_z      DOUBLE PRECISION,
            captured_at  TIMESTAMPTZ      NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Current position per vehicle
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vehicles (
            id               BIGINT           PRIMARY KEY,
            organization_id  BIGINT           NOT NULL,
            device_id        TEXT             NOT NULL,
            latitude         DOUBLE PRECISION NOT NULL DEFAULT 0,
            longitude        DOUBLE PRECISION NOT NULL DEFAULT 0,
            vehicle_number   TEXT,
            make             TEXT,
            model            TEXT,
            year             INTEGER,
            is_deleted       BOOLEAN          NOT NULL DEFAULT FALSE,
            updated_at       TIMESTAMPTZ      NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Fallback lookup: latest row per device
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_location_data_device_captured
            ON location_data (device_id, captured_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_vehicles_organization_id
            ON vehicles (organization_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_vehicles_device_id
            ON vehicles (device_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

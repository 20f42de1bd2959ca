//! Coordinate validation for incoming telemetry.
//!
//! A coordinate pair is usable when both halves are present, parse as finite
//! numbers, are not exactly zero and lie inside the WGS84 ranges. Zero is a
//! "no fix" marker emitted by the trackers, so a true `0.0` on the equator or
//! the prime meridian is rejected as well.

use crate::Position;

// ---

/// Parse and validate a wire coordinate pair.
///
/// Total over its inputs: anything unparseable is simply `None`.
pub fn usable_position(latitude: Option<&str>, longitude: Option<&str>) -> Option<Position> {
    // ---
    let latitude = parse_coordinate(latitude?, 90.0)?;
    let longitude = parse_coordinate(longitude?, 180.0)?;
    Some(Position {
        latitude,
        longitude,
    })
}

#[cfg(test)]
pub fn is_usable(latitude: Option<&str>, longitude: Option<&str>) -> bool {
    usable_position(latitude, longitude).is_some()
}

/// Same rules as [`usable_position`] for values already stored as numbers.
pub fn is_usable_numeric(position: Position) -> bool {
    in_range(position.latitude, 90.0) && in_range(position.longitude, 180.0)
}

fn parse_coordinate(raw: &str, limit: f64) -> Option<f64> {
    let value = raw.trim().parse::<f64>().ok()?;
    in_range(value, limit).then_some(value)
}

fn in_range(value: f64, limit: f64) -> bool {
    value.is_finite() && value != 0.0 && (-limit..=limit).contains(&value)
}

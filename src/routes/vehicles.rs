use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::AppState;
use crate::{IdentityTriple, VehicleLocation};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/vehicles", get(handler))
}

/// Query parameters for location reads
#[derive(Debug, Deserialize)]
pub struct VehiclesQuery {
    orgid: Option<String>,
    vehicleid: Option<String>,
    deviceid: Option<String>,
}

/// What a query asks for once its ids are parsed.
#[derive(Debug, PartialEq)]
enum Selector {
    One(IdentityTriple),
    Fleet(i64),
}

#[derive(Debug, Serialize)]
struct VehiclesBody {
    message: &'static str,
    vehicles: Vec<VehicleLocation>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: &'static str,
    error: String,
}

/// Handle `GET /vehicles`.
///
/// With `vehicleid` and `deviceid` the response lists at most that one
/// vehicle; with only `orgid` it lists the whole fleet.
async fn handler(
    Query(params): Query<VehiclesQuery>,
    State((_, retrieval)): State<AppState>,
) -> impl IntoResponse {
    // ---
    info!("GET /vehicles - {:?}", params);

    let selector = match parse_selector(&params) {
        Ok(selector) => selector,
        Err(e) => {
            error!("GET /vehicles - bad query: {}", e);
            return failure(StatusCode::BAD_REQUEST, "Invalid vehicle query", e);
        }
    };

    let result: Result<Vec<VehicleLocation>, _> = match &selector {
        Selector::One(identity) => retrieval
            .get(identity)
            .await
            .map(|row| row.into_iter().collect()),
        Selector::Fleet(org_id) => retrieval.list_by_org(*org_id).await,
    };

    match result {
        Ok(vehicles) => {
            debug!("GET /vehicles - Returning {} rows", vehicles.len());
            (
                StatusCode::OK,
                Json(VehiclesBody {
                    message: "Vehicle data retrieved",
                    vehicles,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("GET /vehicles - {}", e);
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error fetching vehicle data",
                e.to_string(),
            )
        }
    }
}

fn failure(status: StatusCode, message: &'static str, error: String) -> axum::response::Response {
    (status, Json(ErrorBody { message, error })).into_response()
}

fn parse_selector(params: &VehiclesQuery) -> Result<Selector, String> {
    // ---
    let org_id = parse_id("orgid", params.orgid.as_deref())?
        .ok_or_else(|| "orgid is required".to_string())?;

    let vehicle_id = parse_id("vehicleid", params.vehicleid.as_deref())?;
    let device_id = params
        .deviceid
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());

    Ok(match (vehicle_id, device_id) {
        (Some(vehicle_id), Some(device_id)) => {
            Selector::One(IdentityTriple::new(org_id, vehicle_id, device_id))
        }
        _ => Selector::Fleet(org_id),
    })
}

fn parse_id(name: &str, raw: Option<&str>) -> Result<Option<i64>, String> {
    // ---
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse::<i64>()
            .map(Some)
            .map_err(|e| format!("invalid {name} '{v}': {e}")),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn query(orgid: Option<&str>, vehicleid: Option<&str>, deviceid: Option<&str>) -> VehiclesQuery {
        VehiclesQuery {
            orgid: orgid.map(String::from),
            vehicleid: vehicleid.map(String::from),
            deviceid: deviceid.map(String::from),
        }
    }

    #[test]
    fn test_single_vehicle_selector() {
        // ---
        let selector = parse_selector(&query(Some("1"), Some("7"), Some("D1"))).unwrap();
        assert_eq!(selector, Selector::One(IdentityTriple::new(1, 7, "D1")));
    }

    #[test]
    fn test_fleet_selector_when_ids_incomplete() {
        // ---
        assert_eq!(
            parse_selector(&query(Some("1"), None, None)).unwrap(),
            Selector::Fleet(1)
        );
        assert_eq!(
            parse_selector(&query(Some("1"), Some("7"), None)).unwrap(),
            Selector::Fleet(1)
        );
        assert_eq!(
            parse_selector(&query(Some("1"), None, Some("D1"))).unwrap(),
            Selector::Fleet(1)
        );
    }

    #[test]
    fn test_invalid_selectors() {
        // ---
        assert!(parse_selector(&query(None, Some("7"), Some("D1"))).is_err());
        assert!(parse_selector(&query(Some(""), None, None)).is_err());
        assert!(parse_selector(&query(Some("acme"), None, None)).is_err());
        assert!(parse_selector(&query(Some("1"), Some("seven"), Some("D1"))).is_err());
    }
}

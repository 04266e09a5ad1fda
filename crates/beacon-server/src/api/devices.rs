//! Device API endpoints.
//!
//! Devices come into existence when first sighted; these endpoints list them,
//! name them, query their history and delete them. Sightings themselves arrive
//! at `/api/sightings`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use beacon_core::{BeaconError, Device, HistoryEntry, HistoryRange, Sighting};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the devices router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_devices))
        .route("/{id}", get(get_device).delete(delete_device))
        .route("/{id}/name", put(assign_name))
        .route("/{id}/history", get(device_history))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// All known devices.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceListResponse {
    /// Devices in the order they were first sighted.
    pub devices: Vec<Device>,

    /// Number of devices.
    #[schema(example = 3)]
    pub count: usize,
}

/// Request body for naming a device.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({ "name": "AirTag Keys" }))]
pub struct AssignNameRequest {
    /// New display name.
    #[schema(example = "AirTag Keys", min_length = 1, max_length = 64)]
    pub name: String,
}

/// Optional time window for a history query.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Earliest timestamp to include (RFC 3339).
    #[param(value_type = Option<String>, example = "2025-01-15T00:00:00Z")]
    pub from: Option<DateTime<Utc>>,

    /// Latest timestamp to include (RFC 3339).
    #[param(value_type = Option<String>, example = "2025-01-16T00:00:00Z")]
    pub to: Option<DateTime<Utc>>,
}

/// History entries of one device.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceHistoryResponse {
    /// Normalized device identifier.
    #[schema(example = "AA:BB:CC:DD:EE:01")]
    pub identifier: String,

    /// Matching entries, newest first.
    pub entries: Vec<HistoryEntry>,

    /// Number of entries returned.
    #[schema(example = 2)]
    pub count: usize,
}

/// Result of recording a sighting.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SightingResponse {
    /// The device after the sighting was applied.
    pub device: Device,

    /// Whether this was the first sighting of the device.
    #[schema(example = false)]
    pub created: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// List all known devices.
#[utoipa::path(
    get,
    path = "/api/devices",
    tag = "devices",
    operation_id = "listDevices",
    summary = "List devices",
    description = "Returns every known device with its status, current geofence \
        and full history.",
    responses(
        (status = 200, description = "Devices retrieved", body = DeviceListResponse)
    )
)]
pub async fn list_devices(State(state): State<SharedState>) -> Json<DeviceListResponse> {
    let devices = state.engine.devices().list().await;
    let count = devices.len();
    Json(DeviceListResponse { devices, count })
}

/// Get a single device.
#[utoipa::path(
    get,
    path = "/api/devices/{id}",
    tag = "devices",
    operation_id = "getDevice",
    summary = "Get a device",
    params(("id" = String, Path, description = "Device identifier (MAC address or vendor UUID)")),
    responses(
        (status = 200, description = "Device found", body = Device),
        (status = 404, description = "Device was never sighted", body = ErrorResponse)
    )
)]
pub async fn get_device(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Device>> {
    state
        .engine
        .devices()
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::from(BeaconError::DeviceNotFound(id)))
}

/// Query a device's history.
#[utoipa::path(
    get,
    path = "/api/devices/{id}/history",
    tag = "devices",
    operation_id = "getDeviceHistory",
    summary = "Device history",
    description = "Returns the device's enter, exit and sighted entries, newest \
        first, optionally limited to an inclusive time window.",
    params(
        ("id" = String, Path, description = "Device identifier"),
        HistoryQuery
    ),
    responses(
        (status = 200, description = "History retrieved", body = DeviceHistoryResponse),
        (status = 400, description = "Range ends before it starts", body = ErrorResponse),
        (status = 404, description = "Device was never sighted", body = ErrorResponse)
    )
)]
pub async fn device_history(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<DeviceHistoryResponse>> {
    let range = HistoryRange::new(query.from, query.to);
    let entries = state.engine.device_history(&id, range).await?;
    let identifier = beacon_core::normalize_identifier(&id)?;
    let count = entries.len();
    Ok(Json(DeviceHistoryResponse {
        identifier,
        entries,
        count,
    }))
}

/// Assign a display name to a device.
#[utoipa::path(
    put,
    path = "/api/devices/{id}/name",
    tag = "devices",
    operation_id = "assignDeviceName",
    summary = "Name a device",
    description = "Sets or overwrites the display name of a device that has \
        already been sighted.",
    params(("id" = String, Path, description = "Device identifier")),
    request_body = AssignNameRequest,
    responses(
        (status = 200, description = "Device renamed", body = Device),
        (status = 400, description = "Empty or overlong name", body = ErrorResponse),
        (status = 404, description = "Device was never sighted", body = ErrorResponse)
    )
)]
pub async fn assign_name(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<AssignNameRequest>,
) -> ApiResult<Json<Device>> {
    let device = state
        .engine
        .devices()
        .assign_name(&id, &request.name)
        .await?;
    state.persist().await;
    Ok(Json(device))
}

/// Delete a device and its history.
#[utoipa::path(
    delete,
    path = "/api/devices/{id}",
    tag = "devices",
    operation_id = "deleteDevice",
    summary = "Delete a device",
    description = "Permanently removes a device and its history. Records \
        already queued for sync are still delivered.",
    params(("id" = String, Path, description = "Device identifier")),
    responses(
        (status = 204, description = "Device deleted"),
        (status = 404, description = "Device was never sighted", body = ErrorResponse)
    )
)]
pub async fn delete_device(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if !state.engine.devices().remove(&id) {
        return Err(BeaconError::DeviceNotFound(id).into());
    }
    state.persist().await;
    Ok(StatusCode::NO_CONTENT)
}

/// Record a device sighting.
#[utoipa::path(
    post,
    path = "/api/sightings",
    tag = "devices",
    operation_id = "recordSighting",
    summary = "Record a sighting",
    description = "Reports that a device was observed nearby. Unknown devices \
        are created; a supplied name overwrites the stored one.",
    request_body = Sighting,
    responses(
        (status = 201, description = "First sighting of a new device", body = SightingResponse),
        (status = 200, description = "Known device refreshed", body = SightingResponse),
        (status = 400, description = "Malformed sighting", body = ErrorResponse)
    )
)]
pub async fn record_sighting(
    State(state): State<SharedState>,
    Json(sighting): Json<Sighting>,
) -> ApiResult<(StatusCode, Json<SightingResponse>)> {
    let outcome = state.engine.record_sighting(sighting).await?;
    state.persist().await;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(SightingResponse {
            device: outcome.device,
            created: outcome.created,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_name_request_deserialization() {
        let request: AssignNameRequest = serde_json::from_str(r#"{"name": "Keys"}"#).unwrap();
        assert_eq!(request.name, "Keys");
    }

    #[test]
    fn test_history_query_parses_bounds() {
        let query: HistoryQuery =
            serde_json::from_str(r#"{"from": "2025-01-15T03:30:00Z"}"#).unwrap();
        assert!(query.from.is_some());
        assert!(query.to.is_none());
    }

    #[test]
    fn test_sighting_defaults_optional_fields() {
        let sighting: Sighting =
            serde_json::from_str(r#"{"identifier": "aa:bb:cc:dd:ee:01", "signal_strength": -60}"#)
                .unwrap();
        assert!(sighting.name.is_none());
        assert!(sighting.battery_level.is_none());
    }
}

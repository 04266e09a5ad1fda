//! OpenAPI specification generation for the beacon API.
//!
//! The document is served at `/api/openapi.json` and written to disk by the
//! `gen-openapi` binary for client generation.

use axum::Json;
use beacon_core::{
    Coordinate, Device, DeviceStatus, EventKind, FlushReport, Geofence, GeofenceUpdate,
    HistoryEntry, LocationSample, NewGeofence, Sighting, SyncFailure, SyncRecord, SyncStatus,
};
use utoipa::OpenApi;

use super::devices::{
    AssignNameRequest, DeviceHistoryResponse, DeviceListResponse, SightingResponse,
};
use super::error::ErrorResponse;
use super::geofences::GeofenceListResponse;
use super::health::HealthResponse;
use super::location::{LocationRequest, LocationResponse};

/// Serve the OpenAPI specification as JSON.
///
/// This endpoint is available at `/api/openapi.json` and returns the complete
/// OpenAPI 3.0 specification for the beacon API.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty-printed JSON string.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for beacon.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "beacon API",
        version = "0.1.0",
        description = r#"
# beacon API

beacon keeps track of which of your Bluetooth devices are nearby and where.

## Overview

1. **Devices** are created when first sighted by the scanner. Each keeps its
   last sighting, signal strength, battery level, status and an append-only
   history.
2. **Geofences** are named circles (center + radius in meters). When they
   overlap, the first registered one wins.
3. **Location** samples place the tracker. Every sample is evaluated against
   every device: fresh devices inside an active fence are `active`, fresh
   devices outside are `inactive`, and devices not sighted within the
   staleness threshold are `out_of_range`.
4. **Sync** delivers every `enter`/`exit` event to an external log in order,
   with retries and exponential backoff.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local beacon server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "devices", description = "Known devices, naming and sightings"),
        (name = "geofences", description = "Geofence management"),
        (name = "location", description = "Location samples driving presence evaluation"),
        (name = "sync", description = "Delivery of history events to the external log")
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        // Device endpoints
        super::devices::list_devices,
        super::devices::get_device,
        super::devices::device_history,
        super::devices::assign_name,
        super::devices::delete_device,
        super::devices::record_sighting,
        // Geofence endpoints
        super::geofences::list_geofences,
        super::geofences::create_geofence,
        super::geofences::update_geofence,
        super::geofences::delete_geofence,
        // Location endpoints
        super::location::current_location,
        super::location::ingest_location,
        // Sync endpoints
        super::sync::sync_status,
        super::sync::flush,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Device types
            Device,
            DeviceStatus,
            HistoryEntry,
            EventKind,
            Sighting,
            SightingResponse,
            DeviceListResponse,
            DeviceHistoryResponse,
            AssignNameRequest,
            // Geofence types
            Coordinate,
            Geofence,
            NewGeofence,
            GeofenceUpdate,
            GeofenceListResponse,
            // Location types
            LocationSample,
            LocationRequest,
            LocationResponse,
            // Sync types
            SyncRecord,
            SyncFailure,
            SyncStatus,
            FlushReport,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "beacon API");
        assert!(spec.paths.paths.contains_key("/api/devices/{id}"));
        assert!(spec.paths.paths.contains_key("/api/devices/{id}/history"));
        assert!(spec.paths.paths.contains_key("/api/sync/flush"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"beacon API\""));
    }
}

//! Location API endpoints.
//!
//! A posted sample is evaluated immediately against every known device.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use beacon_core::{Coordinate, LocationSample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the location router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(current_location).post(ingest_location))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for a location sample.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "latitude": 37.0,
    "longitude": -122.0
}))]
pub struct LocationRequest {
    /// Latitude in degrees.
    #[schema(example = 37.0, minimum = -90, maximum = 90)]
    pub latitude: f64,

    /// Longitude in degrees.
    #[schema(example = -122.0, minimum = -180, maximum = 180)]
    pub longitude: f64,

    /// When the reading was taken. Defaults to the time of receipt.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// The retained location sample.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LocationResponse {
    /// Most recent accepted sample; absent until the first one arrives.
    #[schema(nullable)]
    pub sample: Option<LocationSample>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the current location sample.
#[utoipa::path(
    get,
    path = "/api/location",
    tag = "location",
    operation_id = "getLocation",
    summary = "Get the current location",
    responses(
        (status = 200, description = "Current sample (null before the first one)", body = LocationResponse)
    )
)]
pub async fn current_location(State(state): State<SharedState>) -> Json<LocationResponse> {
    Json(LocationResponse {
        sample: state.engine.current_sample(),
    })
}

/// Submit a location sample.
#[utoipa::path(
    post,
    path = "/api/location",
    tag = "location",
    operation_id = "ingestLocation",
    summary = "Submit a location sample",
    description = "Replaces the current sample and evaluates every device \
        against it. Timestamps must not go backwards.",
    request_body = LocationRequest,
    responses(
        (status = 200, description = "Sample accepted and evaluated", body = LocationResponse),
        (status = 400, description = "Coordinates out of range or timestamp earlier than the current sample", body = ErrorResponse)
    )
)]
pub async fn ingest_location(
    State(state): State<SharedState>,
    Json(request): Json<LocationRequest>,
) -> ApiResult<Json<LocationResponse>> {
    let timestamp = request.timestamp.unwrap_or_else(|| state.engine.now());
    let sample = LocationSample::new(
        Coordinate::new(request.latitude, request.longitude),
        timestamp,
    );
    state.engine.ingest_sample(sample).await?;
    state.persist().await;

    Ok(Json(LocationResponse {
        sample: Some(sample),
    }))
}

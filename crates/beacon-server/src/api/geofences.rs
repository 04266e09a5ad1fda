//! Geofence API endpoints.
//!
//! Changes take effect on the next evaluation tick; devices inside a fence
//! that is deactivated or deleted are exited then.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Json, Router};
use beacon_core::{BeaconError, Geofence, GeofenceUpdate, NewGeofence};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the geofences router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_geofences).post(create_geofence))
        .route("/{id}", patch(update_geofence).delete(delete_geofence))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing geofences.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct GeofenceListQuery {
    /// Only return active geofences.
    #[param(example = true)]
    #[serde(default)]
    pub active: bool,
}

/// Registered geofences.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GeofenceListResponse {
    /// Geofences in registration order, which is also match priority.
    pub geofences: Vec<Geofence>,

    /// Number of geofences returned.
    #[schema(example = 2)]
    pub count: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// List geofences.
#[utoipa::path(
    get,
    path = "/api/geofences",
    tag = "geofences",
    operation_id = "listGeofences",
    summary = "List geofences",
    description = "Returns registered geofences in registration order. When \
        fences overlap, the first one listed wins.",
    params(GeofenceListQuery),
    responses(
        (status = 200, description = "Geofences retrieved", body = GeofenceListResponse)
    )
)]
pub async fn list_geofences(
    State(state): State<SharedState>,
    Query(query): Query<GeofenceListQuery>,
) -> Json<GeofenceListResponse> {
    let registry = state.engine.geofences();
    let geofences = if query.active {
        registry.list_active()
    } else {
        registry.list()
    };
    let count = geofences.len();
    Json(GeofenceListResponse { geofences, count })
}

/// Register a geofence.
#[utoipa::path(
    post,
    path = "/api/geofences",
    tag = "geofences",
    operation_id = "createGeofence",
    summary = "Add a geofence",
    request_body = NewGeofence,
    responses(
        (status = 201, description = "Geofence created", body = Geofence),
        (status = 400, description = "Invalid name, center or radius", body = ErrorResponse)
    )
)]
pub async fn create_geofence(
    State(state): State<SharedState>,
    Json(request): Json<NewGeofence>,
) -> ApiResult<(StatusCode, Json<Geofence>)> {
    let fence = state.engine.geofences().create(request)?;
    state.persist().await;
    Ok((StatusCode::CREATED, Json(fence)))
}

/// Update a geofence.
#[utoipa::path(
    patch,
    path = "/api/geofences/{id}",
    tag = "geofences",
    operation_id = "updateGeofence",
    summary = "Update a geofence",
    description = "Applies the supplied fields; omitted fields keep their \
        values. An invalid result leaves the geofence unchanged.",
    params(("id" = Uuid, Path, description = "Geofence id")),
    request_body = GeofenceUpdate,
    responses(
        (status = 200, description = "Geofence updated", body = Geofence),
        (status = 400, description = "Invalid update", body = ErrorResponse),
        (status = 404, description = "Unknown geofence", body = ErrorResponse)
    )
)]
pub async fn update_geofence(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(update): Json<GeofenceUpdate>,
) -> ApiResult<Json<Geofence>> {
    let fence = state.engine.geofences().update(id, update)?;
    state.persist().await;
    Ok(Json(fence))
}

/// Delete a geofence.
#[utoipa::path(
    delete,
    path = "/api/geofences/{id}",
    tag = "geofences",
    operation_id = "deleteGeofence",
    summary = "Delete a geofence",
    params(("id" = Uuid, Path, description = "Geofence id")),
    responses(
        (status = 204, description = "Geofence deleted"),
        (status = 404, description = "Unknown geofence", body = ErrorResponse)
    )
)]
pub async fn delete_geofence(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !state.engine.geofences().remove(id) {
        return Err(BeaconError::GeofenceNotFound(id).into());
    }
    state.persist().await;
    Ok(StatusCode::NO_CONTENT)
}

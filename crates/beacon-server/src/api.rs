//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `devices` - Known devices, naming, deletion and sightings
//! - `geofences` - Geofence management
//! - `location` - Location samples
//! - `sync` - Sync queue status and flushing
//! - `health` - Service health checks
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod devices;
pub mod error;
pub mod geofences;
pub mod health;
pub mod location;
pub mod openapi;
pub mod sync;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};

// Re-export OpenAPI utilities for the gen-openapi binary
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /devices           - Known devices, naming, deletion
/// ├── /sightings         - Device sightings
/// ├── /location          - Current location sample
/// ├── /geofences         - Geofence management
/// ├── /sync              - Sync status and "sync now"
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                // Sightings at /api/sightings
                .route("/sightings", post(devices::record_sighting))
                // OpenAPI spec at /api/openapi.json
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/devices", devices::router())
                .nest("/location", location::router())
                .nest("/geofences", geofences::router())
                .nest("/sync", sync::router()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use beacon_core::BeaconConfig;
    use tower::ServiceExt;

    use super::*;
    use crate::sink::LogSink;
    use crate::state::AppState;

    fn app() -> Router {
        let state = AppState::in_memory(BeaconConfig::default(), Arc::new(LogSink));
        create_router(Arc::new(state))
    }

    #[tokio::test]
    async fn test_health_route() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = app()
            .oneshot(Request::get("/api/unknown").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

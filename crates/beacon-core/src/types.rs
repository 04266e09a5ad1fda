//! Shared types and OpenAPI schemas.
//!
//! This module contains the value types that flow between the registries, the
//! presence engine and the sync queue. Types owned by a single module live
//! with that module (geofences in [`crate::geofence`], devices in
//! [`crate::device`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{BeaconError, Result};
use crate::geo::{is_valid_latitude, is_valid_longitude};

/// A point on the Earth's surface in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "latitude": 37.0, "longitude": -122.0 }))]
pub struct Coordinate {
    /// Latitude in degrees, -90 to 90.
    #[schema(example = 37.0)]
    pub latitude: f64,

    /// Longitude in degrees, -180 to 180.
    #[schema(example = -122.0)]
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate without validating it.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check that latitude and longitude are finite and in range.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::Validation`] naming the offending component.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_latitude(self.latitude) {
            return Err(BeaconError::validation(format!(
                "latitude must be between -90 and 90 (got {})",
                self.latitude
            )));
        }
        if !is_valid_longitude(self.longitude) {
            return Err(BeaconError::validation(format!(
                "longitude must be between -180 and 180 (got {})",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// A single point-in-time location reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "latitude": 37.0,
    "longitude": -122.0,
    "timestamp": "2025-01-15T03:30:00Z"
}))]
pub struct LocationSample {
    /// Latitude in degrees.
    pub latitude: f64,

    /// Longitude in degrees.
    pub longitude: f64,

    /// When the reading was taken (UTC).
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    /// Create a sample at the given point and time.
    #[must_use]
    pub const fn new(coordinate: Coordinate, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            timestamp,
        }
    }

    /// The sampled point.
    #[must_use]
    pub const fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Presence status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Recently sighted and inside an active geofence.
    Active,
    /// Recently sighted but outside every active geofence.
    Inactive,
    /// Not sighted within the staleness window.
    OutOfRange,
}

impl DeviceStatus {
    /// Wire representation of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::OutOfRange => "out_of_range",
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a device history event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// The device entered a geofence.
    Enter,
    /// The device left a geofence.
    Exit,
    /// The device was reported by the scan source.
    Sighted,
}

impl EventKind {
    /// Wire representation of the event kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
            Self::Sighted => "sighted",
        }
    }

    /// Whether events of this kind are delivered to the external log sink.
    #[must_use]
    pub const fn is_synced(self) -> bool {
        matches!(self, Self::Enter | Self::Exit)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, timestamped entry in a device's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "event": "enter",
    "geofence": "Office",
    "timestamp": "2025-01-15T03:30:00Z"
}))]
pub struct HistoryEntry {
    /// What happened.
    pub event: EventKind,

    /// Geofence name for enter/exit events, absent for sightings.
    #[schema(example = "Office")]
    pub geofence: Option<String>,

    /// When the event was recorded (UTC).
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// A geofence entry event.
    #[must_use]
    pub fn enter(geofence: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event: EventKind::Enter,
            geofence: Some(geofence.into()),
            timestamp,
        }
    }

    /// A geofence exit event.
    #[must_use]
    pub fn exit(geofence: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event: EventKind::Exit,
            geofence: Some(geofence.into()),
            timestamp,
        }
    }

    /// A sighting event.
    #[must_use]
    pub const fn sighted(timestamp: DateTime<Utc>) -> Self {
        Self {
            event: EventKind::Sighted,
            geofence: None,
            timestamp,
        }
    }
}

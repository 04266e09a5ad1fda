//! Geofence records and the registry that owns them.
//!
//! The registry keeps fences in registration order. [`GeofenceRegistry::list_active`]
//! yields that order, which is what gives the presence engine its first-match
//! policy for overlapping fences.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{BeaconError, Result};
use crate::types::Coordinate;

/// Color assigned to fences created without one.
pub const DEFAULT_GEOFENCE_COLOR: &str = "#3B82F6";

/// Maximum length of a geofence name.
pub const MAX_GEOFENCE_NAME_LENGTH: usize = 100;

/// A named circular zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "7f0c2d4e-5b0a-4e8e-9a53-2f1f7b1c9d10",
    "name": "Office",
    "color": "#3B82F6",
    "center": { "latitude": 37.0, "longitude": -122.0 },
    "radius_meters": 100.0,
    "active": true,
    "created_at": "2025-01-15T03:30:00Z",
    "updated_at": "2025-01-15T03:30:00Z"
}))]
pub struct Geofence {
    /// Generated identifier.
    pub id: Uuid,

    /// Display name, used in history entries.
    #[schema(example = "Office")]
    pub name: String,

    /// Presentation color.
    #[schema(example = "#3B82F6")]
    pub color: String,

    /// Center of the zone.
    pub center: Coordinate,

    /// Radius in meters, always positive.
    #[schema(example = 100.0)]
    pub radius_meters: f64,

    /// Inactive fences are ignored for containment.
    pub active: bool,

    /// When the fence was created.
    pub created_at: DateTime<Utc>,

    /// When the fence was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Request payload for creating a geofence.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "name": "Office",
    "center": { "latitude": 37.0, "longitude": -122.0 },
    "radius_meters": 100.0
}))]
pub struct NewGeofence {
    /// Display name.
    pub name: String,

    /// Presentation color, defaults to blue.
    #[serde(default)]
    pub color: Option<String>,

    /// Center of the zone.
    pub center: Coordinate,

    /// Radius in meters.
    pub radius_meters: f64,

    /// Whether the fence participates in containment.
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

/// Partial update for a geofence. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "active": false }))]
pub struct GeofenceUpdate {
    /// New display name.
    pub name: Option<String>,

    /// New color.
    pub color: Option<String>,

    /// New center.
    pub center: Option<Coordinate>,

    /// New radius in meters.
    pub radius_meters: Option<f64>,

    /// New active flag.
    pub active: Option<bool>,
}

impl Geofence {
    /// Build a fence with a fresh id. The result is not validated.
    #[must_use]
    pub fn from_new(new: NewGeofence) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: new.name.trim().to_string(),
            color: new
                .color
                .unwrap_or_else(|| DEFAULT_GEOFENCE_COLOR.to_string()),
            center: new.center,
            radius_meters: new.radius_meters,
            active: new.active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the fence invariants.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::Validation`] for an empty or overlong name, a
    /// non-positive or non-finite radius, or out-of-range coordinates.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BeaconError::validation("geofence name cannot be empty"));
        }
        if self.name.chars().count() > MAX_GEOFENCE_NAME_LENGTH {
            return Err(BeaconError::validation(format!(
                "geofence name exceeds {MAX_GEOFENCE_NAME_LENGTH} characters"
            )));
        }
        if !self.radius_meters.is_finite() || self.radius_meters <= 0.0 {
            return Err(BeaconError::validation(format!(
                "radius must be a positive number of meters (got {})",
                self.radius_meters
            )));
        }
        self.center.validate()
    }

    fn merged(&self, update: GeofenceUpdate) -> Self {
        let mut next = self.clone();
        if let Some(name) = update.name {
            next.name = name.trim().to_string();
        }
        if let Some(color) = update.color {
            next.color = color;
        }
        if let Some(center) = update.center {
            next.center = center;
        }
        if let Some(radius) = update.radius_meters {
            next.radius_meters = radius;
        }
        if let Some(active) = update.active {
            next.active = active;
        }
        next.updated_at = Utc::now();
        next
    }
}

/// Owns the set of geofences.
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct GeofenceRegistry {
    fences: Arc<RwLock<Vec<Geofence>>>,
}

impl GeofenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Geofence>> {
        self.fences.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Geofence>> {
        self.fences.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a fence.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::Validation`] if the fence breaks an invariant or
    /// its id is already registered. Nothing is inserted in that case.
    pub fn add(&self, fence: Geofence) -> Result<Geofence> {
        fence.validate()?;

        let mut fences = self.write();
        if fences.iter().any(|f| f.id == fence.id) {
            return Err(BeaconError::validation(format!(
                "geofence {} already exists",
                fence.id
            )));
        }
        info!(geofence_id = %fence.id, name = %fence.name, radius = fence.radius_meters, "Geofence added");
        fences.push(fence.clone());
        Ok(fence)
    }

    /// Create and insert a fence from a request payload.
    ///
    /// # Errors
    ///
    /// See [`GeofenceRegistry::add`].
    pub fn create(&self, new: NewGeofence) -> Result<Geofence> {
        self.add(Geofence::from_new(new))
    }

    /// Delete a fence. Returns `false` if no fence had that id.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut fences = self.write();
        let before = fences.len();
        fences.retain(|f| f.id != id);
        let removed = fences.len() != before;
        if removed {
            info!(geofence_id = %id, "Geofence removed");
        } else {
            debug!(geofence_id = %id, "Geofence already absent");
        }
        removed
    }

    /// Merge `update` into an existing fence.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::GeofenceNotFound`] for an unknown id and
    /// [`BeaconError::Validation`] if the merged fence is invalid. The stored
    /// fence is unchanged on error.
    pub fn update(&self, id: Uuid, update: GeofenceUpdate) -> Result<Geofence> {
        let mut fences = self.write();
        let slot = fences
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(BeaconError::GeofenceNotFound(id))?;

        let next = slot.merged(update);
        next.validate()?;
        *slot = next.clone();
        info!(geofence_id = %id, name = %next.name, active = next.active, "Geofence updated");
        Ok(next)
    }

    /// Look up a fence by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Geofence> {
        self.read().iter().find(|f| f.id == id).cloned()
    }

    /// Active fences. Callers must not depend on the order.
    #[must_use]
    pub fn list_active(&self) -> Vec<Geofence> {
        self.read().iter().filter(|f| f.active).cloned().collect()
    }

    /// Every fence, active or not.
    #[must_use]
    pub fn list(&self) -> Vec<Geofence> {
        self.read().clone()
    }

    /// Number of registered fences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if no fences are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Replace the registry contents with previously persisted fences.
    ///
    /// Invalid fences are skipped.
    pub fn restore(&self, restored: Vec<Geofence>) {
        let valid: Vec<Geofence> = restored
            .into_iter()
            .filter(|fence| match fence.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(geofence_id = %fence.id, error = %e, "Skipping invalid stored geofence");
                    false
                }
            })
            .collect();
        info!(count = valid.len(), "Geofences restored");
        *self.write() = valid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn office() -> NewGeofence {
        NewGeofence {
            name: "Office".to_string(),
            color: None,
            center: Coordinate::new(37.0, -122.0),
            radius_meters: 100.0,
            active: true,
        }
    }

    #[test]
    fn test_create_assigns_defaults() {
        let registry = GeofenceRegistry::new();
        let fence = registry.create(office()).unwrap();

        assert_eq!(fence.name, "Office");
        assert_eq!(fence.color, DEFAULT_GEOFENCE_COLOR);
        assert!(fence.active);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(fence.id), Some(fence));
    }

    #[test]
    fn test_add_rejects_non_positive_radius() {
        let registry = GeofenceRegistry::new();
        for radius in [0.0, -5.0, f64::NAN] {
            let err = registry
                .create(NewGeofence {
                    radius_meters: radius,
                    ..office()
                })
                .unwrap_err();
            assert!(err.is_validation_error());
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_add_rejects_out_of_range_coordinates() {
        let registry = GeofenceRegistry::new();
        let err = registry
            .create(NewGeofence {
                center: Coordinate::new(37.0, 200.0),
                ..office()
            })
            .unwrap_err();
        assert!(err.is_validation_error());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_add_rejects_blank_name() {
        let registry = GeofenceRegistry::new();
        let err = registry
            .create(NewGeofence {
                name: "   ".to_string(),
                ..office()
            })
            .unwrap_err();
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let registry = GeofenceRegistry::new();
        let fence = registry.create(office()).unwrap();
        assert!(registry.add(fence).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_noop_for_unknown_id() {
        let registry = GeofenceRegistry::new();
        let fence = registry.create(office()).unwrap();

        assert!(!registry.remove(Uuid::new_v4()));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(fence.id));
        assert!(registry.is_empty());
        assert!(!registry.remove(fence.id));
    }

    #[test]
    fn test_update_merges_fields() {
        let registry = GeofenceRegistry::new();
        let fence = registry.create(office()).unwrap();

        let updated = registry
            .update(
                fence.id,
                GeofenceUpdate {
                    radius_meters: Some(250.0),
                    active: Some(false),
                    ..GeofenceUpdate::default()
                },
            )
            .unwrap();

        assert_eq!(updated.name, "Office");
        assert!((updated.radius_meters - 250.0).abs() < f64::EPSILON);
        assert!(!updated.active);
        assert!(updated.updated_at >= fence.updated_at);
    }

    #[test]
    fn test_update_unknown_id_is_not_found() {
        let registry = GeofenceRegistry::new();
        let err = registry
            .update(Uuid::new_v4(), GeofenceUpdate::default())
            .unwrap_err();
        assert!(matches!(err, BeaconError::GeofenceNotFound(_)));
    }

    #[test]
    fn test_invalid_update_leaves_fence_unchanged() {
        let registry = GeofenceRegistry::new();
        let fence = registry.create(office()).unwrap();

        let err = registry
            .update(
                fence.id,
                GeofenceUpdate {
                    name: Some("HQ".to_string()),
                    radius_meters: Some(0.0),
                    ..GeofenceUpdate::default()
                },
            )
            .unwrap_err();
        assert!(err.is_validation_error());
        assert_eq!(registry.get(fence.id), Some(fence));
    }

    #[test]
    fn test_list_active_filters_inactive() {
        let registry = GeofenceRegistry::new();
        let home = registry
            .create(NewGeofence {
                name: "Home".to_string(),
                ..office()
            })
            .unwrap();
        registry
            .create(NewGeofence {
                name: "Cabin".to_string(),
                active: false,
                ..office()
            })
            .unwrap();

        let active = registry.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, home.id);
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_restore_skips_invalid_fences() {
        let registry = GeofenceRegistry::new();
        let good = Geofence::from_new(office());
        let mut bad = Geofence::from_new(office());
        bad.radius_meters = -1.0;

        registry.restore(vec![good.clone(), bad]);
        assert_eq!(registry.list(), vec![good]);
    }

    #[test]
    fn test_new_geofence_defaults_to_active() {
        let json = r#"{"name":"Gym","center":{"latitude":1.0,"longitude":2.0},"radius_meters":30.0}"#;
        let new: NewGeofence = serde_json::from_str(json).unwrap();
        assert!(new.active);
        assert!(new.color.is_none());
    }
}

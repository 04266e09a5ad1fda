//! Known devices and their sighting bookkeeping.
//!
//! Each device lives behind its own async mutex. Everything that mutates a
//! device (a sighting, an evaluation tick) takes that lock, so per-device
//! history is appended in the order the triggering events were processed
//! while different devices never contend with each other. The map of
//! handles is only locked long enough to look up or insert a handle.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{BeaconError, Result};
use crate::types::{DeviceStatus, HistoryEntry};

/// Maximum length of a user-assigned device name.
pub const MAX_DEVICE_NAME_LENGTH: usize = 64;

/// Maximum length of a device identifier.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

static MAC_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{2}([:-][0-9A-Fa-f]{2}){5}$").expect("MAC address pattern is valid")
});

/// Returns `true` if `value` looks like a radio (MAC) address.
///
/// Accepts `:` or `-` separators in either case.
#[must_use]
pub fn is_mac_address(value: &str) -> bool {
    MAC_ADDRESS_RE.is_match(value)
}

/// Canonical form of a device identifier.
///
/// MAC addresses become upper-case and colon separated; vendor identifiers
/// (UUIDs and the like) are only trimmed.
///
/// # Errors
///
/// Returns [`BeaconError::Validation`] for empty or overlong identifiers.
pub fn normalize_identifier(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(BeaconError::validation("device identifier cannot be empty"));
    }
    if trimmed.len() > MAX_IDENTIFIER_LENGTH {
        return Err(BeaconError::validation(format!(
            "device identifier exceeds {MAX_IDENTIFIER_LENGTH} characters"
        )));
    }
    if is_mac_address(trimmed) {
        Ok(trimmed.to_uppercase().replace('-', ":"))
    } else {
        Ok(trimmed.to_string())
    }
}

fn normalize_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(BeaconError::validation("device name cannot be empty"));
    }
    if name.chars().count() > MAX_DEVICE_NAME_LENGTH {
        return Err(BeaconError::validation(format!(
            "device name exceeds {MAX_DEVICE_NAME_LENGTH} characters"
        )));
    }
    Ok(name.to_string())
}

/// A report that a device was observed by the scan source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "identifier": "AA:BB:CC:DD:EE:01",
    "signal_strength": -45,
    "name": "MacBook Pro",
    "battery_level": 80
}))]
pub struct Sighting {
    /// Radio address or vendor UUID.
    #[schema(example = "AA:BB:CC:DD:EE:01")]
    pub identifier: String,

    /// Observed signal strength (RSSI, dBm).
    #[schema(example = -45)]
    pub signal_strength: i16,

    /// Name to assign, if the scan source or the user supplied one.
    #[serde(default)]
    pub name: Option<String>,

    /// Battery level in percent, if reported.
    #[serde(default)]
    #[schema(minimum = 0, maximum = 100)]
    pub battery_level: Option<u8>,
}

impl Sighting {
    /// A sighting with no name or battery information.
    #[must_use]
    pub fn new(identifier: impl Into<String>, signal_strength: i16) -> Self {
        Self {
            identifier: identifier.into(),
            signal_strength,
            name: None,
            battery_level: None,
        }
    }

    /// Attach a display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a battery level.
    #[must_use]
    pub const fn with_battery(mut self, level: u8) -> Self {
        self.battery_level = Some(level);
        self
    }
}

/// A known device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "identifier": "AA:BB:CC:DD:EE:01",
    "name": "MacBook Pro",
    "last_sighting": "2025-01-15T03:30:00Z",
    "signal_strength": -45,
    "battery_level": 80,
    "status": "active",
    "geofence_id": "7f0c2d4e-5b0a-4e8e-9a53-2f1f7b1c9d10",
    "geofence_name": "Office",
    "history": [
        { "event": "sighted", "geofence": null, "timestamp": "2025-01-15T03:29:58Z" },
        { "event": "enter", "geofence": "Office", "timestamp": "2025-01-15T03:30:00Z" }
    ]
}))]
pub struct Device {
    /// Stable identifier (normalized).
    pub identifier: String,

    /// User-assigned display name.
    pub name: Option<String>,

    /// When the device was last sighted.
    pub last_sighting: DateTime<Utc>,

    /// Signal strength of the last sighting (dBm).
    pub signal_strength: i16,

    /// Last reported battery level in percent.
    pub battery_level: Option<u8>,

    /// Current presence status.
    pub status: DeviceStatus,

    /// Geofence the device is currently inside.
    pub geofence_id: Option<Uuid>,

    /// Name of that geofence at the time it was entered or last refreshed.
    pub geofence_name: Option<String>,

    /// Append-only event log, in insertion order.
    history: Vec<HistoryEntry>,
}

impl Device {
    fn first_seen(identifier: String, at: DateTime<Utc>, signal_strength: i16) -> Self {
        Self {
            identifier,
            name: None,
            last_sighting: at,
            signal_strength,
            battery_level: None,
            status: DeviceStatus::Inactive,
            geofence_id: None,
            geofence_name: None,
            history: Vec::new(),
        }
    }

    /// The user-assigned name, or the identifier when unnamed.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.identifier)
    }

    /// History entries in insertion order.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub(crate) fn append(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }
}

/// Result of recording a sighting.
#[derive(Debug, Clone)]
pub struct SightingOutcome {
    /// The device after the sighting was applied.
    pub device: Device,

    /// Whether this sighting created the device.
    pub created: bool,
}

/// Inclusive time window for history queries. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryRange {
    /// Earliest timestamp to include.
    pub from: Option<DateTime<Utc>>,

    /// Latest timestamp to include.
    pub to: Option<DateTime<Utc>>,
}

impl HistoryRange {
    /// Window between two optional bounds.
    #[must_use]
    pub const fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    /// Whether `at` falls inside the window.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }

    fn validate(&self) -> Result<()> {
        match (self.from, self.to) {
            (Some(from), Some(to)) if from > to => Err(BeaconError::validation(format!(
                "history range start {from} is after its end {to}"
            ))),
            _ => Ok(()),
        }
    }
}

type DeviceHandle = Arc<Mutex<Device>>;

#[derive(Debug, Default)]
struct DeviceMap {
    order: Vec<String>,
    devices: HashMap<String, DeviceHandle>,
}

/// Owns the known devices.
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    map: Arc<RwLock<DeviceMap>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, DeviceMap> {
        self.map.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DeviceMap> {
        self.map.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, identifier: &str) -> Option<DeviceHandle> {
        self.read().devices.get(identifier).cloned()
    }

    /// A handle is stale once its device was removed (and possibly re-created)
    /// between looking it up and locking it.
    fn is_current(&self, identifier: &str, handle: &DeviceHandle) -> bool {
        self.read()
            .devices
            .get(identifier)
            .is_some_and(|h| Arc::ptr_eq(h, handle))
    }

    fn handle_or_insert(
        &self,
        identifier: &str,
        at: DateTime<Utc>,
        signal_strength: i16,
    ) -> (DeviceHandle, bool) {
        let mut map = self.write();
        if let Some(handle) = map.devices.get(identifier) {
            return (Arc::clone(handle), false);
        }
        let handle = Arc::new(Mutex::new(Device::first_seen(
            identifier.to_string(),
            at,
            signal_strength,
        )));
        map.devices
            .insert(identifier.to_string(), Arc::clone(&handle));
        map.order.push(identifier.to_string());
        (handle, true)
    }

    /// Record that a device was observed at `at`.
    ///
    /// Creates the device (status `inactive`, empty history) on first sight,
    /// otherwise refreshes its last sighting and signal strength. A present
    /// name overwrites the stored one; an absent name never clears it. Every
    /// call appends one `sighted` history entry.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::Validation`] for a malformed identifier, name or
    /// battery level. Nothing is recorded in that case.
    pub async fn record_sighting(
        &self,
        sighting: Sighting,
        at: DateTime<Utc>,
    ) -> Result<SightingOutcome> {
        let identifier = normalize_identifier(&sighting.identifier)?;
        let name = sighting.name.as_deref().map(normalize_name).transpose()?;
        if let Some(level) = sighting.battery_level {
            if level > 100 {
                return Err(BeaconError::validation(format!(
                    "battery level must be between 0 and 100 (got {level})"
                )));
            }
        }

        loop {
            let (handle, created) =
                self.handle_or_insert(&identifier, at, sighting.signal_strength);
            let mut device = handle.lock().await;
            if !self.is_current(&identifier, &handle) {
                continue;
            }

            device.last_sighting = device.last_sighting.max(at);
            device.signal_strength = sighting.signal_strength;
            if let Some(level) = sighting.battery_level {
                device.battery_level = Some(level);
            }
            if let Some(name) = &name {
                device.name = Some(name.clone());
            }
            device.append(HistoryEntry::sighted(at));

            if created {
                info!(device_id = %identifier, rssi = sighting.signal_strength, "New device sighted");
            } else {
                debug!(device_id = %identifier, rssi = sighting.signal_strength, "Device sighted");
            }

            return Ok(SightingOutcome {
                device: device.clone(),
                created,
            });
        }
    }

    /// Set or overwrite a device's display name.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::DeviceNotFound`] if the device was never sighted
    /// and [`BeaconError::Validation`] for an empty or overlong name.
    pub async fn assign_name(&self, identifier: &str, name: &str) -> Result<Device> {
        let name = normalize_name(name)?;
        self.with_device(identifier, move |device| {
            device.name = Some(name);
            info!(device_id = %device.identifier, name = ?device.name, "Device named");
            device.clone()
        })
        .await
    }

    /// Permanently delete a device and its history.
    ///
    /// Returns `false` if the device was unknown.
    pub fn remove(&self, identifier: &str) -> bool {
        let Ok(identifier) = normalize_identifier(identifier) else {
            return false;
        };
        let mut map = self.write();
        let removed = map.devices.remove(&identifier).is_some();
        if removed {
            map.order.retain(|id| id != &identifier);
            info!(device_id = %identifier, "Device removed");
        }
        removed
    }

    /// Snapshot of one device.
    pub async fn get(&self, identifier: &str) -> Option<Device> {
        let identifier = normalize_identifier(identifier).ok()?;
        let handle = self.handle(&identifier)?;
        let device = handle.lock().await;
        Some(device.clone())
    }

    /// Snapshots of every device in insertion order.
    pub async fn list(&self) -> Vec<Device> {
        let handles: Vec<DeviceHandle> = {
            let map = self.read();
            map.order
                .iter()
                .filter_map(|id| map.devices.get(id).cloned())
                .collect()
        };

        let mut devices = Vec::with_capacity(handles.len());
        for handle in handles {
            devices.push(handle.lock().await.clone());
        }
        devices
    }

    /// History of one device within `range`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::DeviceNotFound`] for an unknown identifier and
    /// [`BeaconError::Validation`] if the range ends before it starts.
    pub async fn history(&self, identifier: &str, range: HistoryRange) -> Result<Vec<HistoryEntry>> {
        range.validate()?;
        self.with_device(identifier, |device| {
            device
                .history()
                .iter()
                .rev()
                .filter(|entry| range.contains(entry.timestamp))
                .cloned()
                .collect()
        })
        .await
    }

    /// Identifiers of every device in insertion order.
    #[must_use]
    pub fn identifiers(&self) -> Vec<String> {
        self.read().order.clone()
    }

    /// Number of known devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    /// Returns `true` if no devices are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().order.is_empty()
    }

    /// Run `f` with exclusive access to one device.
    ///
    /// This is the only way device state is mutated after creation; the lock
    /// is held for the whole closure, which must not block.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::DeviceNotFound`] for an unknown identifier or a
    /// device removed while waiting for the lock.
    pub async fn with_device<F, T>(&self, identifier: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Device) -> T + Send,
    {
        let identifier = normalize_identifier(identifier)
            .map_err(|_| BeaconError::DeviceNotFound(identifier.to_string()))?;
        let handle = self
            .handle(&identifier)
            .ok_or_else(|| BeaconError::DeviceNotFound(identifier.clone()))?;

        let mut device = handle.lock().await;
        if !self.is_current(&identifier, &handle) {
            return Err(BeaconError::DeviceNotFound(identifier));
        }
        Ok(f(&mut device))
    }

    /// Replace the registry contents with previously persisted devices.
    ///
    /// Later duplicates of an identifier are dropped.
    pub fn restore(&self, devices: Vec<Device>) {
        let mut restored = DeviceMap::default();
        for device in devices {
            let Ok(identifier) = normalize_identifier(&device.identifier) else {
                continue;
            };
            if restored.devices.contains_key(&identifier) {
                continue;
            }
            restored.order.push(identifier.clone());
            restored
                .devices
                .insert(identifier, Arc::new(Mutex::new(device)));
        }
        info!(count = restored.order.len(), "Devices restored");
        *self.write() = restored;
    }
}

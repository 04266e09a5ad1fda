//! # beacon-core
//!
//! Core business logic for the beacon device presence tracker.
//!
//! This crate provides:
//! - Device identity and sighting bookkeeping
//! - Circular geofences and containment tests
//! - A presence state machine producing enter/exit history
//! - An outbound sync queue with retry and backoff
//! - Configuration management and snapshot persistence
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`geo`] - Great-circle distance and geofence containment
//! - [`geofence`] - Geofence definitions and the geofence registry
//! - [`device`] - Device records, identifier rules and the device registry
//! - [`presence`] - The presence engine fusing sightings and location samples
//! - [`scheduler`] - Periodic location sampling and the scan pump
//! - [`scan`] - Scan source abstraction
//! - [`sync`] - Outbound event queue and delivery
//! - [`clock`] - Time source used for staleness
//! - [`config`] - Application configuration loading, saving, and validation
//! - [`storage`] - Snapshot persistence using JSON files
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod geo;
pub mod geofence;
pub mod presence;
pub mod scan;
pub mod scheduler;
pub mod storage;
pub mod sync;
pub mod types;

// Re-export primary types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    default_config_path, BeaconConfig, ConfigError, ConfigResult, PresenceConfig, ServerConfig,
    StorageConfig, SyncConfig,
};
pub use device::{
    is_mac_address, normalize_identifier, Device, DeviceRegistry, HistoryRange, Sighting,
    SightingOutcome, MAX_DEVICE_NAME_LENGTH,
};
pub use error::{BeaconError, Result};
pub use geo::{distance_meters, find_containing, is_contained};
pub use geofence::{
    Geofence, GeofenceRegistry, GeofenceUpdate, NewGeofence, DEFAULT_GEOFENCE_COLOR,
};
pub use presence::{PresenceEngine, MAX_SAMPLE_CLOCK_SKEW_SECS};
#[cfg(any(test, feature = "mock-scan"))]
pub use scan::MockScanSource;
pub use scan::ScanSource;
pub use scheduler::{LocationSampler, LocationSource, ScanPump};
pub use storage::{default_data_dir, Snapshot, Storage};
pub use sync::{
    FlushReport, SyncError, SyncFailure, SyncPolicy, SyncQueue, SyncRecord, SyncSink, SyncStatus,
    SyncWorker,
};
pub use types::{Coordinate, DeviceStatus, EventKind, HistoryEntry, LocationSample};

//! Persistent storage for device and geofence state.
//!
//! The registries are in-memory; the host decides when to snapshot them. A
//! snapshot is one JSON file. Each save writes its own temp file in the data
//! directory and renames it over the previous snapshot, so concurrent saves
//! never share a partially written file.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{BeaconError, Result};
use crate::geofence::Geofence;
use crate::types::LocationSample;

const SNAPSHOT_FILE: &str = "state.json";

/// Durable registry contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,

    /// Devices in registry order.
    pub devices: Vec<Device>,

    /// Geofences in registration order.
    pub geofences: Vec<Geofence>,

    /// Most recent location sample. Absent in snapshots from older versions.
    #[serde(default)]
    pub sample: Option<LocationSample>,
}

/// Storage backend for beacon data.
#[derive(Debug, Clone)]
pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    /// Create a storage rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Storage in the platform default location.
    ///
    /// On Linux servers: `/var/lib/beacon/`
    /// Elsewhere: the platform data directory, e.g. `~/.local/share/beacon/`
    ///
    /// # Errors
    ///
    /// Returns an error if no data directory can be determined.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(default_data_dir()?))
    }

    /// Directory holding the snapshot.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Full path of the snapshot file.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }

    /// Load the last snapshot, if one was ever saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_snapshot(&self) -> Result<Option<Snapshot>> {
        let path = self.snapshot_path();
        if !path.exists() {
            debug!(path = %path.display(), "No snapshot found");
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let snapshot: Snapshot = serde_json::from_str(&content).map_err(|e| {
            BeaconError::PersistenceError(format!("Invalid snapshot {}: {e}", path.display()))
        })?;
        info!(
            path = %path.display(),
            devices = snapshot.devices.len(),
            geofences = snapshot.geofences.len(),
            "Snapshot loaded"
        );
        Ok(Some(snapshot))
    }

    /// Save a snapshot, replacing the previous one atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        let path = self.snapshot_path();

        let content = serde_json::to_vec_pretty(snapshot)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".state-")
            .suffix(".json.tmp")
            .tempfile_in(&self.data_dir)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| {
            BeaconError::PersistenceError(format!(
                "Failed to replace {}: {}",
                path.display(),
                e.error
            ))
        })?;
        debug!(path = %path.display(), "Snapshot saved");
        Ok(())
    }
}

/// Platform default data directory.
///
/// # Errors
///
/// Returns an error if the platform data directory cannot be determined.
pub fn default_data_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/var/lib/beacon"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs = directories::ProjectDirs::from("", "", "beacon").ok_or_else(|| {
            BeaconError::PersistenceError("Cannot determine data directory".into())
        })?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

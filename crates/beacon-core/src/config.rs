//! Application configuration management.
//!
//! Handles loading, saving, and validating beacon configuration including:
//! - Presence policy (staleness threshold, location sampling interval)
//! - Log sink delivery (endpoint, credentials, pause switch, retry budget, backoff, timeouts)
//! - Server bind address
//! - Data directory for snapshots
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `BEACON__`-prefixed environment variables
//! (e.g. `BEACON__SYNC__ENDPOINT`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "BEACON";

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("Failed to write {path}: {source}")]
    WriteError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A source could not be parsed or deserialized.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// The configuration could not be serialized to TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("Invalid {field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconConfig {
    /// Presence engine policy.
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Log sink delivery.
    #[serde(default)]
    pub sync: SyncConfig,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Snapshot storage.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Presence engine policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Seconds without a sighting before a device is out of range.
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: u64,

    /// Seconds between periodic location evaluations.
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
}

/// Log sink delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Endpoint receiving records as JSON. Unset means log-only delivery.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Delivery to the endpoint is paused while `false`; records stay queued.
    #[serde(default = "default_sync_enabled")]
    pub enabled: bool,

    /// Sent as a bearer token with every delivery.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Attempts per record before it is dropped.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the retry delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Upper bound on one delivery attempt, in seconds.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Snapshot storage settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the device/geofence snapshot. Unset uses the platform
    /// data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

const fn default_stale_threshold_secs() -> u64 {
    300
}
const fn default_sample_interval_secs() -> u64 {
    30
}
const fn default_sync_enabled() -> bool {
    true
}
const fn default_max_attempts() -> u32 {
    5
}
const fn default_initial_backoff_ms() -> u64 {
    500
}
const fn default_max_backoff_ms() -> u64 {
    30_000
}
const fn default_attempt_timeout_secs() -> u64 {
    10
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
const fn default_port() -> u16 {
    3000
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            stale_threshold_secs: default_stale_threshold_secs(),
            sample_interval_secs: default_sample_interval_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            enabled: default_sync_enabled(),
            api_key: None,
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl PresenceConfig {
    /// Staleness threshold as a duration.
    #[must_use]
    pub const fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    /// Sampling interval as a duration.
    #[must_use]
    pub const fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }
}

impl SyncConfig {
    /// Initial retry delay.
    #[must_use]
    pub const fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Maximum retry delay.
    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Per-attempt timeout.
    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// The endpoint, if one is set and non-blank.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    /// The API key, if one is set and non-blank.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

impl BeaconConfig {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result fails
    /// validation.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let loaded: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Parse configuration from a TOML string (no environment layering).
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or fails validation.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let loaded: Self = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Write the configuration as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        })
    }

    /// Check every field, reporting all violations at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a single violation and
    /// [`ConfigError::MultipleValidationErrors`] for several.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut invalid = |field: &str, message: &str| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message: message.to_string(),
            });
        };

        if self.presence.stale_threshold_secs == 0 {
            invalid("presence.stale_threshold_secs", "must be greater than 0");
        }
        if self.presence.sample_interval_secs == 0 {
            invalid("presence.sample_interval_secs", "must be greater than 0");
        }
        if self.sync.max_attempts == 0 {
            invalid("sync.max_attempts", "must be at least 1");
        }
        if self.sync.max_backoff_ms < self.sync.initial_backoff_ms {
            invalid(
                "sync.max_backoff_ms",
                "must not be smaller than sync.initial_backoff_ms",
            );
        }
        if self.sync.attempt_timeout_secs == 0 {
            invalid("sync.attempt_timeout_secs", "must be greater than 0");
        }
        if let Some(endpoint) = self.sync.endpoint() {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                invalid("sync.endpoint", "must be an http:// or https:// URL");
            }
        }
        if self.server.host.trim().is_empty() {
            invalid("server.host", "cannot be empty");
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Default configuration file location.
///
/// On Linux servers: `/etc/beacon/config.toml`.
/// Elsewhere: the platform config directory, e.g. `~/.config/beacon/config.toml`.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/beacon/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon").map_or_else(
            || PathBuf::from("config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}

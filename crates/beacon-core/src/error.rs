//! Unified error types for the beacon core library.
//!
//! [`BeaconError`] covers every failure the engine surfaces to its callers.
//! Modules with their own failure vocabulary (configuration loading, sink
//! delivery) keep a specific error type and convert into [`BeaconError`] at
//! the boundary.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Fail fast**: Registry errors go straight back to the caller, nothing is
//!   partially applied
//! - **HTTP-ready**: Error types include HTTP status codes and error codes
//!
//! # Example
//!
//! ```rust
//! use beacon_core::error::{BeaconError, Result};
//!
//! fn check_radius(radius: f64) -> Result<()> {
//!     if radius <= 0.0 {
//!         return Err(BeaconError::Validation("radius must be positive".into()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;
use uuid::Uuid;

/// The unified error type for all beacon operations.
#[derive(Debug, Error)]
pub enum BeaconError {
    // =========================================================================
    // INPUT ERRORS
    // =========================================================================
    /// Malformed geofence, sample or device parameters.
    #[error("Validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // LOOKUP ERRORS
    // =========================================================================
    /// The referenced device has never been sighted (or was deleted).
    #[error("Device not found: '{0}'. A device must be sighted before it can be referenced.")]
    DeviceNotFound(String),

    /// The referenced geofence does not exist.
    #[error("Geofence not found: {0}")]
    GeofenceNotFound(Uuid),

    // =========================================================================
    // SYNC ERRORS
    // =========================================================================
    /// A history record could not be delivered after exhausting retries.
    #[error("Sync failed for device '{device_id}' after {attempts} attempts: {reason}")]
    SyncFailure {
        /// Identifier of the device the record belongs to.
        device_id: String,
        /// Number of delivery attempts made.
        attempts: u32,
        /// Last failure reported by the sink.
        reason: String,
    },

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for beacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

impl BeaconError {
    /// Shorthand for building a [`BeaconError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns `true` if this error is a rejected input.
    #[inline]
    #[must_use]
    pub const fn is_validation_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns `true` if this error references an unknown device or geofence.
    #[inline]
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::DeviceNotFound(_) | Self::GeofenceNotFound(_))
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::DeviceNotFound(_) | Self::GeofenceNotFound(_) => 404,
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,
            Self::PersistenceError(_) | Self::IoError(_) => 500,
            Self::SyncFailure { .. } => 502,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::GeofenceNotFound(_) => "GEOFENCE_NOT_FOUND",
            Self::SyncFailure { .. } => "SYNC_FAILURE",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BeaconError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {path}: {source}"))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {path}: {source}"))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<serde_json::Error> for BeaconError {
    fn from(err: serde_json::Error) -> Self {
        Self::PersistenceError(format!("Invalid snapshot data: {err}"))
    }
}

// =============================================================================
// TESTS
// =============================================================================

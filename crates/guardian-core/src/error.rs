//! Unified error types for the guardian core library.
//!
//! This module provides a unified error type [`GuardianError`] that covers all failure
//! modes across the guardian system. Each module also has its own specific error types
//! (`SampleError`, `ConfigError`, `SettingsError`, `DeliveryError`, `LocationError`,
//! `FeedError`) for internal use.
//!
//! # Propagation
//!
//! - **Absorbed locally**: delivery failures, settings read failures and missing
//!   location fixes never reach a caller as an error; they are logged and the
//!   pipeline keeps running with a fallback.
//! - **Surfaced**: configuration validation failures and malformed samples are
//!   returned to the caller so they can be corrected at the boundary.
//!
//! # Example
//!
//! ```rust
//! use guardian_core::error::{GuardianError, Result};
//! use std::path::PathBuf;
//!
//! fn load_config(path: &PathBuf) -> Result<()> {
//!     if !path.exists() {
//!         return Err(GuardianError::ConfigNotFound(path.clone()));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all guardian operations.
#[derive(Debug, Error)]
pub enum GuardianError {
    // =========================================================================
    // SIGNAL INPUT ERRORS
    // =========================================================================
    /// A signal sample was malformed and has been dropped.
    #[error("Invalid signal sample: {0}")]
    InvalidSample(String),

    /// A location fix had coordinates outside the valid range.
    #[error("Invalid location fix: {0}")]
    InvalidLocation(String),

    /// The signal sampler has been stopped and accepts no more events.
    #[error("Signal sampler is stopped. Restart the monitor to resume ingesting samples.")]
    SamplerStopped,

    /// The sample buffer is full; the event was not queued.
    #[error("Signal sample buffer is full ({capacity} pending). Slow down the sample rate.")]
    SamplerBackpressure {
        /// Capacity of the sample buffer.
        capacity: usize,
    },

    /// The monitor loop is not running.
    #[error("The separation monitor is not running")]
    MonitorUnavailable,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // NOTIFICATION ERRORS
    // =========================================================================
    /// A notification could not be delivered.
    #[error("Notification delivery failed: {0}")]
    DeliveryFailed(String),

    /// A notification attempt did not complete in time.
    #[error("Notification delivery timed out after {0} seconds")]
    DeliveryTimeout(u64),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading settings.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for guardian operations.
pub type Result<T> = std::result::Result<T, GuardianError>;

/// Short alias for [`GuardianError`].
pub type Error = GuardianError;

impl GuardianError {
    /// Returns `true` if this error concerns data arriving from the beacon or
    /// location collaborators.
    #[inline]
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSample(_)
                | Self::InvalidLocation(_)
                | Self::SamplerStopped
                | Self::SamplerBackpressure { .. }
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to notification delivery.
    #[inline]
    #[must_use]
    pub const fn is_delivery_error(&self) -> bool {
        matches!(self, Self::DeliveryFailed(_) | Self::DeliveryTimeout(_))
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if this error is likely recoverable without user intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DeliveryFailed(_)
                | Self::DeliveryTimeout(_)
                | Self::SamplerBackpressure { .. }
                | Self::PersistenceError(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidSample(_) | Self::InvalidLocation(_) | Self::ConfigValidationError(_) => {
                400
            }

            // 404 Not Found
            Self::ConfigNotFound(_) => 404,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) => 422,

            // 429 Too Many Requests
            Self::SamplerBackpressure { .. } => 429,

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 502 Bad Gateway - the messaging relay misbehaved
            Self::DeliveryFailed(_) => 502,

            // 503 Service Unavailable - monitor or sampler not running
            Self::SamplerStopped | Self::MonitorUnavailable => 503,

            // 504 Gateway Timeout
            Self::DeliveryTimeout(_) => 504,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidSample(_) => "INVALID_SAMPLE",
            Self::InvalidLocation(_) => "INVALID_LOCATION",
            Self::SamplerStopped => "SAMPLER_STOPPED",
            Self::SamplerBackpressure { .. } => "SAMPLER_BACKPRESSURE",
            Self::MonitorUnavailable => "MONITOR_UNAVAILABLE",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::DeliveryFailed(_) => "DELIVERY_FAILED",
            Self::DeliveryTimeout(_) => "DELIVERY_TIMEOUT",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for GuardianError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path.into()),
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

impl From<crate::monitor::SampleError> for GuardianError {
    fn from(err: crate::monitor::SampleError) -> Self {
        Self::InvalidSample(err.to_string())
    }
}

impl From<crate::location::LocationError> for GuardianError {
    fn from(err: crate::location::LocationError) -> Self {
        Self::InvalidLocation(err.to_string())
    }
}

impl From<crate::sampler::FeedError> for GuardianError {
    fn from(err: crate::sampler::FeedError) -> Self {
        use crate::sampler::FeedError;
        match err {
            FeedError::Stopped => Self::SamplerStopped,
            FeedError::Full { capacity } => Self::SamplerBackpressure { capacity },
        }
    }
}

impl From<crate::dispatch::DeliveryError> for GuardianError {
    fn from(err: crate::dispatch::DeliveryError) -> Self {
        use crate::dispatch::DeliveryError;
        match err {
            DeliveryError::Timeout { secs } => Self::DeliveryTimeout(secs),
            other => Self::DeliveryFailed(other.to_string()),
        }
    }
}

impl From<crate::settings::SettingsError> for GuardianError {
    fn from(err: crate::settings::SettingsError) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_input_error_classification() {
        assert!(GuardianError::InvalidSample("not a number".into()).is_input_error());
        assert!(GuardianError::SamplerStopped.is_input_error());
        assert!(GuardianError::SamplerBackpressure { capacity: 8 }.is_input_error());

        assert!(!GuardianError::MonitorUnavailable.is_input_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(GuardianError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(GuardianError::ConfigParseError("syntax error".into()).is_config_error());
        assert!(GuardianError::ConfigValidationError("invalid value".into()).is_config_error());

        assert!(!GuardianError::SamplerStopped.is_config_error());
    }

    #[test]
    fn test_delivery_error_classification() {
        assert!(GuardianError::DeliveryFailed("relay down".into()).is_delivery_error());
        assert!(GuardianError::DeliveryTimeout(15).is_delivery_error());
        assert!(!GuardianError::PersistenceError("disk full".into()).is_delivery_error());
    }

    #[test]
    fn test_io_error_classification() {
        assert!(GuardianError::PersistenceError("disk full".into()).is_io_error());
        assert!(GuardianError::IoError(IoErr::new(ErrorKind::NotFound, "test")).is_io_error());

        assert!(!GuardianError::MonitorUnavailable.is_io_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(GuardianError::DeliveryFailed("503".into()).is_recoverable());
        assert!(GuardianError::DeliveryTimeout(15).is_recoverable());
        assert!(!GuardianError::ConfigValidationError("threshold".into()).is_recoverable());
        assert!(!GuardianError::InvalidSample("nan".into()).is_recoverable());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(
            GuardianError::InvalidSample("bad".into()).http_status_code(),
            400
        );
        assert_eq!(
            GuardianError::ConfigValidationError("bad".into()).http_status_code(),
            400
        );
        assert_eq!(
            GuardianError::ConfigNotFound(PathBuf::new()).http_status_code(),
            404
        );
        assert_eq!(
            GuardianError::SamplerBackpressure { capacity: 1 }.http_status_code(),
            429
        );
        assert_eq!(
            GuardianError::PersistenceError("error".into()).http_status_code(),
            500
        );
        assert_eq!(GuardianError::MonitorUnavailable.http_status_code(), 503);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            GuardianError::InvalidSample("x".into()).error_code(),
            "INVALID_SAMPLE"
        );
        assert_eq!(
            GuardianError::MonitorUnavailable.error_code(),
            "MONITOR_UNAVAILABLE"
        );
        assert_eq!(
            GuardianError::ConfigNotFound(PathBuf::new()).error_code(),
            "CONFIG_NOT_FOUND"
        );
    }

    #[test]
    fn test_from_config_validation_error() {
        let err = crate::config::ConfigError::ValidationError {
            field: "monitor.rssi_threshold".into(),
            message: "must be between -100 and -20 dBm".into(),
        };
        let guardian_err: GuardianError = err.into();
        assert!(guardian_err.is_config_error());
        assert!(guardian_err.to_string().contains("monitor.rssi_threshold"));
    }

    #[test]
    fn test_from_delivery_timeout() {
        let err = crate::dispatch::DeliveryError::Timeout { secs: 15 };
        let guardian_err: GuardianError = err.into();
        assert!(matches!(guardian_err, GuardianError::DeliveryTimeout(15)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoErr::new(ErrorKind::NotFound, "file not found");
        let guardian_err: GuardianError = io_err.into();
        assert!(matches!(guardian_err, GuardianError::IoError(_)));
        assert!(guardian_err.is_io_error());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<GuardianError>();
        assert_sync::<GuardianError>();
    }
}

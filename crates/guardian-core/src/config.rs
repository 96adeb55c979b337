//! Application configuration management.
//!
//! Handles loading, saving, and validating guardian configuration including:
//! - RSSI threshold and grace period for separation detection
//! - Alert profile (primary or audio-only)
//! - Emergency contact and messaging relay
//! - Retry policy for outbound notifications
//! - Settings storage location and HTTP bind address
//!
//! Configuration is layered: an optional TOML file, then environment variables
//! prefixed with `GUARDIAN__` (for example `GUARDIAN__MONITOR__RSSI_THRESHOLD=-75`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alarm::{AlertProfile, GraceDuration};
use crate::dispatch::RetryPolicy;
use crate::monitor::{Threshold, DEFAULT_THRESHOLD};
use crate::types::EmergencyContact;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "GUARDIAN";

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/guardian/config.toml";

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {0}")]
    NotFound(String),

    /// The configuration file could not be read.
    #[error("failed to read configuration {path}: {source}")]
    ReadError {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("failed to write configuration {path}: {source}")]
    WriteError {
        /// Path that was written.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration sources could not be merged or deserialized.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] ::config::ConfigError),

    /// The configuration could not be serialized to TOML.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("invalid {field}: {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} configuration errors: {}", .0.len(), join_errors(.0))]
    MultipleValidationErrors(Vec<ConfigError>),
}

impl ConfigError {
    /// Shorthand for a [`ConfigError::ValidationError`].
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Separation detection settings.
    pub monitor: MonitorConfig,

    /// Emergency notification settings.
    pub notification: NotificationConfig,

    /// Local alert playback settings.
    pub alert: AlertConfig,

    /// Persisted settings location.
    pub storage: StorageConfig,

    /// HTTP service settings.
    pub server: ServerConfig,
}

/// Separation detection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// RSSI below which the beacon counts as out of range (dBm).
    pub rssi_threshold: i16,

    /// Deployment profile; selects the default grace period.
    pub profile: AlertProfile,

    /// Grace period override in seconds. Falls back to the profile default.
    pub grace_secs: Option<u64>,

    /// Interval between countdown ticks in milliseconds.
    pub tick_interval_ms: u64,

    /// Number of sampler events buffered ahead of the monitor loop.
    pub sample_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rssi_threshold: DEFAULT_THRESHOLD,
            profile: AlertProfile::Primary,
            grace_secs: None,
            tick_interval_ms: 1000,
            sample_buffer: 64,
        }
    }
}

impl MonitorConfig {
    /// The validated threshold.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the threshold is out of range.
    pub fn threshold(&self) -> ConfigResult<Threshold> {
        Threshold::new(self.rssi_threshold)
    }

    /// The effective grace period: the override if present, else the profile default.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the override is out of range.
    pub fn grace(&self) -> ConfigResult<GraceDuration> {
        self.grace_secs
            .map_or_else(|| Ok(self.profile.default_grace()), GraceDuration::from_secs)
    }

    /// Interval between countdown ticks.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Emergency notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Phone number to notify when an alarm is raised.
    pub emergency_contact: Option<String>,

    /// HTTP endpoint of the messaging relay. Without it, messages are only logged.
    pub relay_url: Option<String>,

    /// Bearer token for the relay.
    #[serde(skip_serializing)]
    pub relay_token: Option<String>,

    /// Delay before retrying a failed delivery, in seconds.
    pub retry_backoff_secs: u64,

    /// Time allowed for a single delivery attempt, in seconds.
    pub attempt_timeout_secs: u64,

    /// Maximum number of attempts per alarm. Unset retries until cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            emergency_contact: None,
            relay_url: None,
            relay_token: None,
            retry_backoff_secs: 60,
            attempt_timeout_secs: 15,
            max_attempts: None,
        }
    }
}

impl NotificationConfig {
    /// The validated emergency contact, if any.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the contact is not phone-number-shaped.
    pub fn contact(&self) -> ConfigResult<Option<EmergencyContact>> {
        self.emergency_contact
            .as_deref()
            .map(EmergencyContact::parse)
            .transpose()
    }

    /// Retry policy derived from this section.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::from_secs(self.retry_backoff_secs),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
            max_attempts: self.max_attempts,
        }
    }
}

/// Local alert playback settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Command played in a loop while alarmed, e.g. `["paplay", "/usr/share/sounds/alarm.oga"]`.
    /// Empty means alerts are only logged.
    pub command: Vec<String>,
}

/// Persisted settings location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Settings file path. Defaults to the platform data directory.
    pub settings_path: Option<PathBuf>,
}

/// HTTP service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file that must exist, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, cannot be parsed, or fails validation.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::build(path, true)
    }

    /// Load configuration, using defaults for anything the file or environment omit.
    ///
    /// # Errors
    ///
    /// Returns an error if a present file cannot be parsed or the result fails validation.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::build(path.as_ref(), false)
    }

    fn build(path: &Path, required: bool) -> ConfigResult<Self> {
        let settings = ::config::Config::builder()
            .add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as TOML. The relay token is never written.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
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

    /// Validate every section, collecting all failures.
    ///
    /// # Errors
    ///
    /// Returns the single failure, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.monitor.threshold() {
            errors.push(e);
        }
        if let Err(e) = self.monitor.grace() {
            errors.push(e);
        }
        if !(100..=60_000).contains(&self.monitor.tick_interval_ms) {
            errors.push(ConfigError::invalid(
                "monitor.tick_interval_ms",
                "must be between 100 and 60000 milliseconds",
            ));
        }
        if self.monitor.sample_buffer == 0 {
            errors.push(ConfigError::invalid(
                "monitor.sample_buffer",
                "must be at least 1",
            ));
        }

        if let Err(e) = self.notification.contact() {
            errors.push(e);
        }
        if let Some(url) = &self.notification.relay_url {
            if !is_valid_relay_url(url) {
                errors.push(ConfigError::invalid(
                    "notification.relay_url",
                    format!("'{url}' is not an http(s) URL"),
                ));
            }
        }
        if self.notification.retry_backoff_secs == 0 {
            errors.push(ConfigError::invalid(
                "notification.retry_backoff_secs",
                "must be at least 1 second",
            ));
        }
        if self.notification.attempt_timeout_secs == 0 {
            errors.push(ConfigError::invalid(
                "notification.attempt_timeout_secs",
                "must be at least 1 second",
            ));
        }
        if self.notification.max_attempts == Some(0) {
            errors.push(ConfigError::invalid(
                "notification.max_attempts",
                "must be at least 1 when set",
            ));
        }

        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ConfigError::invalid(
                "server.bind_address",
                format!("'{}' is not a socket address", self.server.bind_address),
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

static PHONE_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9]{3,15}$").expect("phone number regex is valid"));

static RELAY_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/?#]+(/[^\s]*)?$").expect("relay URL regex is valid"));

/// Strip the separators people type into phone numbers.
#[must_use]
pub fn normalize_phone_number(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect()
}

/// Check that a string is phone-number-shaped after normalization.
#[must_use]
pub fn is_valid_phone_number(raw: &str) -> bool {
    PHONE_NUMBER_RE.is_match(&normalize_phone_number(raw))
}

/// Check that a string is an absolute http(s) URL.
#[must_use]
pub fn is_valid_relay_url(url: &str) -> bool {
    RELAY_URL_RE.is_match(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.monitor.rssi_threshold, -70);
        assert_eq!(config.monitor.grace().unwrap().secs(), 10);
        assert_eq!(config.notification.retry_policy().backoff, Duration::from_secs(60));
        assert_eq!(config.notification.retry_policy().max_attempts, None);
    }

    #[test]
    fn test_audio_only_profile_defaults_to_five_seconds() {
        let monitor = MonitorConfig {
            profile: AlertProfile::AudioOnly,
            ..MonitorConfig::default()
        };
        assert_eq!(monitor.grace().unwrap().secs(), 5);

        let overridden = MonitorConfig {
            grace_secs: Some(30),
            ..monitor
        };
        assert_eq!(overridden.grace().unwrap().secs(), 30);
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = Config::default();
        config.monitor.rssi_threshold = -5;
        config.notification.emergency_contact = Some("call me maybe".into());
        config.server.bind_address = "not-an-address".into();

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_single_validation_error_is_not_wrapped() {
        let mut config = Config::default();
        config.monitor.grace_secs = Some(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [monitor]
            rssi_threshold = -75
            profile = "audio_only"

            [notification]
            emergency_contact = "+49 151 1234 5678"
            relay_url = "https://relay.example.com/send"
            retry_backoff_secs = 30
            max_attempts = 5
            "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.monitor.rssi_threshold, -75);
        assert_eq!(config.monitor.profile, AlertProfile::AudioOnly);
        assert_eq!(config.monitor.grace().unwrap().secs(), 5);
        assert_eq!(
            config.notification.contact().unwrap().unwrap().identifier(),
            "+4915112345678"
        );
        assert_eq!(config.notification.max_attempts, Some(5));
        // Untouched sections keep defaults
        assert_eq!(config.server.bind_address, "0.0.0.0:3000");
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.monitor, MonitorConfig::default());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[monitor]\nrssi_threshold = -120\n").unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.monitor.rssi_threshold = -82;
        config.notification.relay_token = Some("secret".into());
        config.save(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains("secret"));

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.monitor.rssi_threshold, -82);
        assert_eq!(reloaded.notification.relay_token, None);
    }

    #[test]
    fn test_phone_number_validation() {
        assert!(is_valid_phone_number("+4915112345678"));
        assert!(is_valid_phone_number("(030) 123-456"));
        assert!(is_valid_phone_number("112"));
        assert!(!is_valid_phone_number("12"));
        assert!(!is_valid_phone_number("+49 abc"));
        assert!(!is_valid_phone_number(""));
        assert!(!is_valid_phone_number("+1234567890123456"));
    }

    #[test]
    fn test_relay_url_validation() {
        assert!(is_valid_relay_url("https://relay.example.com/send"));
        assert!(is_valid_relay_url("http://127.0.0.1:8080"));
        assert!(!is_valid_relay_url("ftp://relay.example.com"));
        assert!(!is_valid_relay_url("relay.example.com"));
    }
}

//! Persisted user settings.
//!
//! Threshold, grace period and emergency contact survive restarts through a
//! [`SettingsStore`]. Reads are best-effort: [`PersistedSettings::load`]
//! never fails and falls back to the in-memory values it was given.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::alarm::GraceDuration;
use crate::monitor::Threshold;
use crate::types::EmergencyContact;

/// Keys understood by the settings store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    /// Out-of-range threshold in dBm.
    RssiThreshold,
    /// Grace period in seconds.
    GraceSecs,
    /// Emergency contact identifier.
    EmergencyContact,
}

impl SettingKey {
    /// All keys, in storage order.
    pub const ALL: [Self; 3] = [Self::RssiThreshold, Self::GraceSecs, Self::EmergencyContact];

    /// Stable key name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RssiThreshold => "rssi_threshold",
            Self::GraceSecs => "grace_secs",
            Self::EmergencyContact => "emergency_contact",
        }
    }
}

/// Settings storage failures.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The backing file could not be read.
    #[error("failed to read settings from {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The backing file could not be written.
    #[error("failed to write settings to {path}: {source}")]
    WriteError {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The stored document is not valid JSON.
    #[error("failed to parse settings: {0}")]
    ParseError(#[source] serde_json::Error),

    /// The document could not be serialized.
    #[error("failed to serialize settings: {0}")]
    SerializeError(#[source] serde_json::Error),

    /// A stored value has the wrong shape or is out of range.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// Setting key.
        key: &'static str,
        /// What was wrong.
        message: String,
    },
}

/// Asynchronous key-value persistence for user settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read a value. `Ok(None)` when the key was never set.
    async fn get(&self, key: SettingKey) -> Result<Option<Value>, SettingsError>;

    /// Write a value.
    async fn set(&self, key: SettingKey, value: Value) -> Result<(), SettingsError>;

    /// Delete a value. Removing a missing key is not an error.
    async fn remove(&self, key: SettingKey) -> Result<(), SettingsError>;
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<HashMap<SettingKey, Value>>,
}

impl MemorySettingsStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: SettingKey) -> Result<Option<Value>, SettingsError> {
        Ok(self.values.lock().get(&key).cloned())
    }

    async fn set(&self, key: SettingKey, value: Value) -> Result<(), SettingsError> {
        self.values.lock().insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: SettingKey) -> Result<(), SettingsError> {
        self.values.lock().remove(&key);
        Ok(())
    }
}

/// JSON document on disk.
///
/// Writes go to a sibling temporary file that is renamed over the original,
/// so a crash mid-write leaves the previous document intact.
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileSettingsStore {
    /// Create a store backed by `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Default settings location.
    ///
    /// On Linux: `/var/lib/guardian/settings.json`
    /// Elsewhere: the platform data directory.
    #[must_use]
    pub fn default_path() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/var/lib/guardian/settings.json")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "guardian").map_or_else(
                || PathBuf::from("guardian-settings.json"),
                |dirs| dirs.data_dir().join("settings.json"),
            )
        }
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<serde_json::Map<String, Value>, SettingsError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(serde_json::Map::new());
            }
            Err(source) => {
                return Err(SettingsError::ReadError {
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_str(&content).map_err(SettingsError::ParseError)
    }

    async fn write_document(
        &self,
        document: &serde_json::Map<String, Value>,
    ) -> Result<(), SettingsError> {
        let write_error = |source: std::io::Error| SettingsError::WriteError {
            path: self.path.display().to_string(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        let content =
            serde_json::to_string_pretty(document).map_err(SettingsError::SerializeError)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await.map_err(write_error)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(write_error)?;
        debug!(path = %self.path.display(), "Settings written");
        Ok(())
    }

    async fn modify(
        &self,
        update: impl FnOnce(&mut serde_json::Map<String, Value>) + Send,
    ) -> Result<(), SettingsError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document().await?;
        update(&mut document);
        self.write_document(&document).await
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn get(&self, key: SettingKey) -> Result<Option<Value>, SettingsError> {
        let mut document = self.read_document().await?;
        Ok(document.remove(key.as_str()))
    }

    async fn set(&self, key: SettingKey, value: Value) -> Result<(), SettingsError> {
        self.modify(move |document| {
            document.insert(key.as_str().to_string(), value);
        })
        .await
    }

    async fn remove(&self, key: SettingKey) -> Result<(), SettingsError> {
        self.modify(move |document| {
            document.remove(key.as_str());
        })
        .await
    }
}

/// The user-adjustable settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSettings {
    /// Out-of-range threshold.
    pub threshold: Threshold,
    /// Grace period.
    pub grace: GraceDuration,
    /// Who to notify, if anyone.
    pub contact: Option<EmergencyContact>,
}

impl PersistedSettings {
    /// Load every setting from `store`.
    ///
    /// Missing keys keep the value from `fallback`. Read, parse and
    /// validation failures are logged and also keep the fallback value.
    pub async fn load(store: &dyn SettingsStore, fallback: &Self) -> Self {
        let threshold = read_setting(store, SettingKey::RssiThreshold, |value| {
            let dbm = value
                .as_i64()
                .and_then(|v| i16::try_from(v).ok())
                .ok_or_else(|| format!("expected an integer, got {value}"))?;
            Threshold::new(dbm).map_err(|e| e.to_string())
        })
        .await
        .unwrap_or(fallback.threshold);

        let grace = read_setting(store, SettingKey::GraceSecs, |value| {
            let secs = value
                .as_u64()
                .ok_or_else(|| format!("expected a positive integer, got {value}"))?;
            GraceDuration::from_secs(secs).map_err(|e| e.to_string())
        })
        .await
        .unwrap_or(fallback.grace);

        let contact = read_setting(store, SettingKey::EmergencyContact, |value| match value {
            Value::Null => Ok(None),
            Value::String(raw) => EmergencyContact::parse(raw)
                .map(Some)
                .map_err(|e| e.to_string()),
            other => Err(format!("expected a string or null, got {other}")),
        })
        .await
        .unwrap_or_else(|| fallback.contact.clone());

        Self {
            threshold,
            grace,
            contact,
        }
    }
}

async fn read_setting<T>(
    store: &dyn SettingsStore,
    key: SettingKey,
    parse: impl FnOnce(&Value) -> Result<T, String>,
) -> Option<T> {
    match store.get(key).await {
        Ok(Some(value)) => match parse(&value) {
            Ok(parsed) => Some(parsed),
            Err(message) => {
                let err = SettingsError::InvalidValue {
                    key: key.as_str(),
                    message,
                };
                warn!(error = %err, "Ignoring stored setting");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(key = key.as_str(), error = %e, "Failed to read setting, keeping current value");
            None
        }
    }
}

/// Persist the threshold.
///
/// # Errors
///
/// Returns the store's error.
pub async fn save_threshold(
    store: &dyn SettingsStore,
    threshold: Threshold,
) -> Result<(), SettingsError> {
    store
        .set(SettingKey::RssiThreshold, Value::from(threshold.dbm()))
        .await
}

/// Persist the grace period.
///
/// # Errors
///
/// Returns the store's error.
pub async fn save_grace(
    store: &dyn SettingsStore,
    grace: GraceDuration,
) -> Result<(), SettingsError> {
    store.set(SettingKey::GraceSecs, Value::from(grace.secs())).await
}

/// Persist the contact. `None` stores an explicit null so a cleared contact
/// stays cleared even when the config file names one.
///
/// # Errors
///
/// Returns the store's error.
pub async fn save_contact(
    store: &dyn SettingsStore,
    contact: Option<&EmergencyContact>,
) -> Result<(), SettingsError> {
    match contact {
        Some(contact) => {
            store
                .set(
                    SettingKey::EmergencyContact,
                    Value::from(contact.identifier()),
                )
                .await
        }
        None => store.set(SettingKey::EmergencyContact, Value::Null).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn defaults() -> PersistedSettings {
        PersistedSettings {
            threshold: Threshold::default(),
            grace: GraceDuration::from_secs(10).unwrap(),
            contact: None,
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl SettingsStore for BrokenStore {
        async fn get(&self, _key: SettingKey) -> Result<Option<Value>, SettingsError> {
            Err(SettingsError::ReadError {
                path: "/dev/broken".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            })
        }

        async fn set(&self, _key: SettingKey, _value: Value) -> Result<(), SettingsError> {
            Err(SettingsError::WriteError {
                path: "/dev/broken".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            })
        }

        async fn remove(&self, _key: SettingKey) -> Result<(), SettingsError> {
            Ok(())
        }
    }

    #[test]
    fn test_key_names_are_stable() {
        let names: Vec<_> = SettingKey::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, ["rssi_threshold", "grace_secs", "emergency_contact"]);
    }

    #[tokio::test]
    async fn test_threshold_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = FileSettingsStore::new(&path);
        save_threshold(&store, Threshold::new(-82).unwrap())
            .await
            .unwrap();

        let reopened = FileSettingsStore::new(&path);
        let loaded = PersistedSettings::load(&reopened, &defaults()).await;
        assert_eq!(loaded.threshold.dbm(), -82);
        assert_eq!(loaded.grace, defaults().grace);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_all_settings_round_trip() {
        let store = MemorySettingsStore::new();
        let contact = EmergencyContact::parse("+4915112345678").unwrap();

        save_threshold(&store, Threshold::new(-65).unwrap())
            .await
            .unwrap();
        save_grace(&store, GraceDuration::from_secs(5).unwrap())
            .await
            .unwrap();
        save_contact(&store, Some(&contact)).await.unwrap();

        let loaded = PersistedSettings::load(&store, &defaults()).await;
        assert_eq!(loaded.threshold.dbm(), -65);
        assert_eq!(loaded.grace.secs(), 5);
        assert_eq!(loaded.contact, Some(contact));

        save_contact(&store, None).await.unwrap();
        let cleared = PersistedSettings::load(&store, &loaded).await;
        assert_eq!(cleared.contact, None);
    }

    #[tokio::test]
    async fn test_cleared_contact_overrides_fallback_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        let configured = PersistedSettings {
            contact: Some(EmergencyContact::parse("+4915112345678").unwrap()),
            ..defaults()
        };

        let store = FileSettingsStore::new(&path);
        save_contact(&store, None).await.unwrap();
        assert_eq!(
            store.get(SettingKey::EmergencyContact).await.unwrap(),
            Some(Value::Null)
        );

        let reopened = FileSettingsStore::new(&path);
        let loaded = PersistedSettings::load(&reopened, &configured).await;
        assert_eq!(loaded.contact, None);
    }

    #[tokio::test]
    async fn test_missing_file_uses_fallback() {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::new(dir.path().join("absent.json"));

        assert_eq!(store.get(SettingKey::GraceSecs).await.unwrap(), None);
        assert_eq!(PersistedSettings::load(&store, &defaults()).await, defaults());
    }

    #[tokio::test]
    async fn test_corrupt_file_uses_fallback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileSettingsStore::new(&path);
        assert!(matches!(
            store.get(SettingKey::RssiThreshold).await,
            Err(SettingsError::ParseError(_))
        ));
        assert_eq!(PersistedSettings::load(&store, &defaults()).await, defaults());
    }

    #[tokio::test]
    async fn test_read_failure_uses_fallback() {
        let fallback = PersistedSettings {
            threshold: Threshold::new(-90).unwrap(),
            grace: GraceDuration::from_secs(30).unwrap(),
            contact: Some(EmergencyContact::parse("01511234567").unwrap()),
        };
        assert_eq!(PersistedSettings::load(&BrokenStore, &fallback).await, fallback);
        assert!(save_threshold(&BrokenStore, Threshold::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_stored_values_are_ignored() {
        let store = MemorySettingsStore::new();
        store.set(SettingKey::RssiThreshold, json!(-5)).await.unwrap();
        store.set(SettingKey::GraceSecs, json!("ten")).await.unwrap();
        store
            .set(SettingKey::EmergencyContact, json!("call mom"))
            .await
            .unwrap();

        assert_eq!(PersistedSettings::load(&store, &defaults()).await, defaults());
    }

    #[tokio::test]
    async fn test_null_contact_clears() {
        let store = MemorySettingsStore::new();
        store
            .set(SettingKey::EmergencyContact, Value::Null)
            .await
            .unwrap();

        let fallback = PersistedSettings {
            contact: Some(EmergencyContact::parse("01511234567").unwrap()),
            ..defaults()
        };
        assert_eq!(PersistedSettings::load(&store, &fallback).await.contact, None);
    }

    #[tokio::test]
    async fn test_file_store_keeps_other_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::new(dir.path().join("settings.json"));

        store.set(SettingKey::GraceSecs, json!(20)).await.unwrap();
        store.set(SettingKey::RssiThreshold, json!(-75)).await.unwrap();
        store.remove(SettingKey::EmergencyContact).await.unwrap();

        assert_eq!(store.get(SettingKey::GraceSecs).await.unwrap(), Some(json!(20)));
        assert_eq!(
            store.get(SettingKey::RssiThreshold).await.unwrap(),
            Some(json!(-75))
        );
    }
}

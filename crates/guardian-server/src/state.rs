//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Instant;

use guardian_core::{Config, GuardianHandle, LocationTracker, SampleFeed, SettingsStore};

/// Handler state type used by every router.
pub type SharedState = AppState;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    guardian: GuardianHandle,
    feed: SampleFeed,
    location: LocationTracker,
    settings: Arc<dyn SettingsStore>,
    config: Config,
    started_at: Instant,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        guardian: GuardianHandle,
        feed: SampleFeed,
        location: LocationTracker,
        settings: Arc<dyn SettingsStore>,
        config: Config,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                guardian,
                feed,
                location,
                settings,
                config,
                started_at: Instant::now(),
            }),
        }
    }

    /// Handle to the running monitor loop.
    #[must_use]
    pub fn guardian(&self) -> &GuardianHandle {
        &self.inner.guardian
    }

    /// Ingest side of the signal sampler.
    #[must_use]
    pub fn feed(&self) -> &SampleFeed {
        &self.inner.feed
    }

    /// Last-known location slot.
    #[must_use]
    pub fn location(&self) -> &LocationTracker {
        &self.inner.location
    }

    /// Persisted settings store.
    #[must_use]
    pub fn settings(&self) -> &dyn SettingsStore {
        self.inner.settings.as_ref()
    }

    /// Startup configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Seconds since the state was created.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }
}

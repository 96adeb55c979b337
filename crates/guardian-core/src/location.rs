//! Last-known location of the protected person.
//!
//! The location provider is an external collaborator that pushes fixes at a
//! bounded rate. The core only ever asks for the most recent one; having no
//! fix at all is a normal state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;
use utoipa::ToSchema;

/// A rejected location fix.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    /// Latitude outside -90..=90 or not finite.
    #[error("latitude {0} is outside -90..=90")]
    InvalidLatitude(f64),

    /// Longitude outside -180..=180 or not finite.
    #[error("longitude {0} is outside -180..=180")]
    InvalidLongitude(f64),
}

/// A geographic position with capture time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "latitude": 52.520008,
    "longitude": 13.404954,
    "captured_at": "2025-01-15T03:30:00Z"
}))]
pub struct LocationFix {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// When the position was measured (UTC).
    pub captured_at: DateTime<Utc>,
}

impl LocationFix {
    /// Validate coordinates.
    ///
    /// # Errors
    ///
    /// Returns a [`LocationError`] for non-finite or out-of-range coordinates.
    pub fn new(
        latitude: f64,
        longitude: f64,
        captured_at: DateTime<Utc>,
    ) -> Result<Self, LocationError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(LocationError::InvalidLatitude(latitude));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(LocationError::InvalidLongitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
            captured_at,
        })
    }

    /// How old the fix is at `now`. Fixes from the future count as fresh.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.captured_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the fix is older than `max_age`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }

    /// Map link for the position.
    #[must_use]
    pub fn map_link(&self) -> String {
        format!(
            "https://www.google.com/maps?q={:.6},{:.6}",
            self.latitude, self.longitude
        )
    }
}

/// Source of the most recent location fix.
pub trait LocationProvider: Send + Sync {
    /// The newest fix, or `None` if none is available.
    fn latest(&self) -> Option<LocationFix>;
}

/// Holds the latest fix pushed by the location collaborator.
///
/// Cloning yields another handle to the same slot.
#[derive(Debug, Clone)]
pub struct LocationTracker {
    slot: Arc<watch::Sender<Option<LocationFix>>>,
}

impl LocationTracker {
    /// Create a tracker with no fix.
    #[must_use]
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Record a fix. Fixes older than the current one are ignored so that
    /// late deliveries cannot roll the position back.
    ///
    /// Returns `true` if the fix was stored.
    pub fn update(&self, fix: LocationFix) -> bool {
        self.slot.send_if_modified(|current| match current {
            Some(existing) if existing.captured_at > fix.captured_at => {
                debug!(
                    captured_at = %fix.captured_at,
                    "ignoring location fix older than the current one"
                );
                false
            }
            _ => {
                *current = Some(fix);
                true
            }
        })
    }

    /// Forget the current fix.
    pub fn clear(&self) {
        self.slot.send_replace(None);
    }

    /// Watch for new fixes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<LocationFix>> {
        self.slot.subscribe()
    }
}

impl Default for LocationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationProvider for LocationTracker {
    fn latest(&self) -> Option<LocationFix> {
        *self.slot.borrow()
    }
}

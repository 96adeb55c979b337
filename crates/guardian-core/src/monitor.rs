//! Threshold classification of beacon signal strength.
//!
//! A sample is out of range when its strength is strictly below the configured
//! threshold; a sample exactly at the threshold is in range. Classification is
//! a pure function of the latest sample and the threshold in effect, so a
//! threshold change only affects samples classified after it.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::ConfigError;
use crate::types::{RawSignalSample, SamplerEvent, SignalSample};

/// Lowest configurable threshold (dBm).
pub const MIN_THRESHOLD: i16 = -100;

/// Highest configurable threshold (dBm).
pub const MAX_THRESHOLD: i16 = -20;

/// Threshold used until the user configures one.
pub const DEFAULT_THRESHOLD: i16 = -70;

/// Weakest reading a radio can plausibly report (dBm).
pub const MIN_PLAUSIBLE_RSSI: i16 = -127;

/// Strongest reading a radio can plausibly report (dBm).
pub const MAX_PLAUSIBLE_RSSI: i16 = 20;

/// A malformed sample rejected at the boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    /// The strength was not a JSON number.
    #[error("signal strength must be a number, got {found}")]
    NotNumeric {
        /// JSON type that was received instead.
        found: &'static str,
    },

    /// The strength had a fractional part.
    #[error("signal strength must be a whole number of dBm, got {value}")]
    NotIntegral {
        /// The received value.
        value: f64,
    },

    /// The strength is outside what any radio reports.
    #[error(
        "signal strength {value} dBm is outside the plausible range {min}..={max}",
        min = MIN_PLAUSIBLE_RSSI,
        max = MAX_PLAUSIBLE_RSSI
    )]
    OutOfRange {
        /// The received value.
        value: f64,
    },
}

/// Whether the beacon is considered near enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RangeState {
    /// Strength at or above the threshold.
    InRange,
    /// Strength below the threshold, or the beacon is disconnected.
    OutOfRange,
}

/// Coarse signal quality for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignalQuality {
    /// -50 dBm or better.
    Strong,
    /// -70 dBm or better.
    Fair,
    /// Below -70 dBm.
    Weak,
}

impl SignalQuality {
    /// Band a raw strength.
    #[must_use]
    pub const fn from_strength(strength: i16) -> Self {
        if strength >= -50 {
            Self::Strong
        } else if strength >= -70 {
            Self::Fair
        } else {
            Self::Weak
        }
    }
}

/// RSSI threshold separating in-range from out-of-range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "i16", into = "i16")]
#[schema(value_type = i16, example = -70)]
pub struct Threshold(i16);

impl Threshold {
    /// Validate a threshold in dBm.
    ///
    /// # Errors
    ///
    /// Returns a validation error outside `MIN_THRESHOLD..=MAX_THRESHOLD`.
    pub fn new(dbm: i16) -> Result<Self, ConfigError> {
        if (MIN_THRESHOLD..=MAX_THRESHOLD).contains(&dbm) {
            Ok(Self(dbm))
        } else {
            Err(ConfigError::invalid(
                "monitor.rssi_threshold",
                format!("{dbm} dBm is outside {MIN_THRESHOLD}..={MAX_THRESHOLD} dBm"),
            ))
        }
    }

    /// The threshold in dBm.
    #[must_use]
    pub const fn dbm(self) -> i16 {
        self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(DEFAULT_THRESHOLD)
    }
}

impl TryFrom<i16> for Threshold {
    type Error = ConfigError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Threshold> for i16 {
    fn from(threshold: Threshold) -> Self {
        threshold.0
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} dBm", self.0)
    }
}

/// Classify a sample against a threshold.
#[must_use]
pub const fn classify(sample: &SignalSample, threshold: Threshold) -> RangeState {
    if sample.strength < threshold.0 {
        RangeState::OutOfRange
    } else {
        RangeState::InRange
    }
}

/// Classify a sampler event. Losing the beacon counts as out of range.
#[must_use]
pub const fn classify_event(event: &SamplerEvent, threshold: Threshold) -> RangeState {
    match event {
        SamplerEvent::Sample(sample) => classify(sample, threshold),
        SamplerEvent::Disconnected { .. } => RangeState::OutOfRange,
    }
}

/// Validate a raw JSON strength value.
///
/// # Errors
///
/// Returns a [`SampleError`] for non-numeric, fractional or implausible values.
pub fn parse_strength(value: &serde_json::Value) -> Result<i16, SampleError> {
    let serde_json::Value::Number(number) = value else {
        return Err(SampleError::NotNumeric {
            found: json_kind(value),
        });
    };

    let plausible = MIN_PLAUSIBLE_RSSI..=MAX_PLAUSIBLE_RSSI;
    let value = number.as_f64().unwrap_or(f64::INFINITY);

    if let Some(whole) = number.as_i64() {
        return i16::try_from(whole)
            .ok()
            .filter(|strength| plausible.contains(strength))
            .ok_or(SampleError::OutOfRange { value });
    }

    // u64 beyond i64::MAX, or a float
    if value.fract() != 0.0 {
        return Err(SampleError::NotIntegral { value });
    }
    if value < f64::from(MIN_PLAUSIBLE_RSSI) || value > f64::from(MAX_PLAUSIBLE_RSSI) {
        return Err(SampleError::OutOfRange { value });
    }
    #[allow(clippy::cast_possible_truncation)]
    let strength = value as i16;
    Ok(strength)
}

const fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

impl TryFrom<RawSignalSample> for SignalSample {
    type Error = SampleError;

    fn try_from(raw: RawSignalSample) -> Result<Self, Self::Error> {
        let strength = parse_strength(&raw.strength)?;
        Ok(Self::new(strength, raw.timestamp.unwrap_or_else(Utc::now)))
    }
}

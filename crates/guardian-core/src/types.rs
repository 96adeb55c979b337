//! Shared types and OpenAPI schemas.
//!
//! Data that flows from the beacon sampler through the monitor to the
//! dispatcher. Types that cross the HTTP boundary derive `ToSchema`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::{is_valid_phone_number, normalize_phone_number, ConfigError};

/// A single signal-strength reading for the connected beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SignalSample {
    /// Received signal strength in dBm (typically negative).
    #[schema(example = -72)]
    pub strength: i16,

    /// When the reading was taken (UTC).
    pub timestamp: DateTime<Utc>,
}

impl SignalSample {
    /// Create a sample from an already-typed reading.
    #[must_use]
    pub const fn new(strength: i16, timestamp: DateTime<Utc>) -> Self {
        Self {
            strength,
            timestamp,
        }
    }
}

/// A signal sample as received from the wire, before validation.
///
/// `strength` is kept as raw JSON so that non-numeric input can be rejected
/// with a precise error instead of a generic deserialization failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "strength": -72,
    "timestamp": "2025-01-15T03:30:00Z"
}))]
pub struct RawSignalSample {
    /// Received signal strength in dBm.
    #[serde(default)]
    #[schema(value_type = i32, example = -72)]
    pub strength: serde_json::Value,

    /// When the reading was taken. Defaults to the time of arrival.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// An event produced by a signal sampler subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerEvent {
    /// A new reading for the connected beacon.
    Sample(SignalSample),

    /// The beacon was lost entirely.
    Disconnected {
        /// When the loss was detected.
        at: DateTime<Utc>,
    },
}

impl SamplerEvent {
    /// When the underlying observation was made.
    #[must_use]
    pub const fn observed_at(&self) -> DateTime<Utc> {
        match self {
            Self::Sample(sample) => sample.timestamp,
            Self::Disconnected { at } => *at,
        }
    }
}

/// Phone-number-shaped identifier of the person to notify.
///
/// Only constructed through [`EmergencyContact::parse`], so every instance is
/// normalized (separators removed, optional leading `+`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmergencyContact {
    identifier: String,
}

impl utoipa::PartialSchema for EmergencyContact {
    fn schema() -> utoipa::openapi::RefOr<utoipa::openapi::schema::Schema> {
        utoipa::openapi::ObjectBuilder::new()
            .schema_type(utoipa::openapi::schema::Type::String)
            .examples(["+4915112345678"])
            .into()
    }
}

impl ToSchema for EmergencyContact {}

impl EmergencyContact {
    /// Validate and normalize a contact identifier.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the value is not phone-number-shaped.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        if !is_valid_phone_number(raw) {
            return Err(ConfigError::invalid(
                "notification.emergency_contact",
                format!("'{raw}' is not a phone number (3-15 digits, optional leading '+')"),
            ));
        }
        Ok(Self {
            identifier: normalize_phone_number(raw),
        })
    }

    /// The normalized identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl fmt::Display for EmergencyContact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier)
    }
}

impl TryFrom<String> for EmergencyContact {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EmergencyContact> for String {
    fn from(contact: EmergencyContact) -> Self {
        contact.identifier
    }
}

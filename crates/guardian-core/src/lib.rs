//! # guardian-core
//!
//! Decision logic for the guardian beacon separation alarm.
//!
//! This crate provides:
//! - Threshold classification of beacon signal strength
//! - A grace-period alarm state machine with wall-clock recovery
//! - Emergency notification delivery with cancellable retry
//! - Persisted user settings and startup configuration
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`monitor`] - Classifies samples as in or out of range
//! - [`alarm`] - Idle / counting down / alarmed state machine
//! - [`dispatch`] - Notification dispatcher with per-contact retry chains
//! - [`guardian`] - Single-writer coordinator wiring the pieces together
//! - [`alert`] - Audible alert sinks
//! - [`location`] - Last-known location tracking
//! - [`sampler`] - Signal sampler subscription
//! - [`settings`] - Persisted settings store
//! - [`config`] - Startup configuration loading and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod alarm;
pub mod alert;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod guardian;
pub mod location;
pub mod monitor;
pub mod sampler;
pub mod settings;
pub mod types;

// Re-export primary types for convenience
pub use alarm::{AlarmEvent, AlarmState, AlarmStateMachine, AlertProfile, GraceDuration};
pub use alert::{AlertSink, CommandAlertSink, LogAlertSink};
pub use config::{
    is_valid_phone_number, is_valid_relay_url, Config, ConfigError, ConfigResult,
    MonitorConfig, NotificationConfig,
};
pub use dispatch::{
    compose_message, DeliveryAttempt, DeliveryChannel, DeliveryError, DeliveryOutcome,
    LogChannel, NotificationDispatcher, OutboundMessage, RetryPolicy,
};
pub use error::{Error, GuardianError, Result};
pub use guardian::{Clock, Guardian, GuardianHandle, StatusSnapshot, SystemClock};
pub use location::{LocationError, LocationFix, LocationProvider, LocationTracker};
pub use monitor::{classify, classify_event, RangeState, SampleError, SignalQuality, Threshold};
pub use sampler::{ChannelSampler, FeedError, SampleFeed, SignalSampler};
pub use settings::{
    FileSettingsStore, MemorySettingsStore, PersistedSettings, SettingKey, SettingsError,
    SettingsStore,
};
pub use types::{EmergencyContact, RawSignalSample, SamplerEvent, SignalSample};

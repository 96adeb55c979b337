//! OpenAPI specification generation for the guardian API.
//!
//! This module generates an OpenAPI 3.0 specification that is consumed by
//! client generators for the companion app and the radio bridge.

use axum::Json;
use utoipa::OpenApi;

use guardian_core::{
    AlarmEvent, AlarmState, AlertProfile, EmergencyContact, GraceDuration, LocationFix,
    RangeState, RawSignalSample, SignalQuality, SignalSample, StatusSnapshot, Threshold,
};

use super::config::{
    ConfigResponse, UpdateConfigResponse, UpdateContactRequest, UpdateGraceRequest,
    UpdateThresholdRequest,
};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::location::{LocationUpdateRequest, LocationUpdateResponse};
use super::samples::{DisconnectedRequest, SampleAccepted};
use super::status::ResetResponse;

/// Serve the OpenAPI specification as JSON.
///
/// This endpoint is available at `/api/openapi.json` and returns the complete
/// OpenAPI 3.0 specification for the guardian API.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a string (for writing to file).
/// Used by the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for guardian.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "guardian API",
        version = "0.1.0",
        description = r#"
# guardian API

guardian raises an alarm when a beacon worn by the person it protects drifts
out of range for longer than a grace period, and optionally notifies an
emergency contact with their last known location.

## Overview

1. **Samples**: a radio bridge posts beacon signal readings, or reports loss of the beacon
2. **Alarm**: readings below the threshold start a countdown; the alarm fires when it runs out
3. **Acknowledgement**: a raised alarm stays raised until it is explicitly reset
4. **Notification**: on alarm, a message with a map link goes to the emergency contact,
   retried after a fixed backoff until delivered or the alarm is reset

## Design Philosophy

- **False alarms are costlier than late alarms**: a recovery reading beats a countdown tick
- **Fresh location**: every retry uses the newest fix available
- **Best effort**: relay failures never stop monitoring
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local guardian server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks"
        ),
        (
            name = "alarm",
            description = "Alarm status and acknowledgement"
        ),
        (
            name = "samples",
            description = "Beacon signal ingest from the radio bridge"
        ),
        (
            name = "location",
            description = "Last known location used in emergency notifications"
        ),
        (
            name = "config",
            description = "Threshold, grace period and emergency contact"
        )
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        // Alarm endpoints
        super::status::get_status,
        super::status::reset_alarm,
        // Ingest endpoints
        super::samples::ingest_sample,
        super::samples::report_disconnected,
        super::location::update_location,
        super::location::clear_location,
        // Config endpoints
        super::config::get_config,
        super::config::update_threshold,
        super::config::update_grace,
        super::config::update_contact,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Alarm types
            StatusSnapshot,
            AlarmState,
            AlarmEvent,
            AlertProfile,
            RangeState,
            SignalQuality,
            Threshold,
            GraceDuration,
            EmergencyContact,
            ResetResponse,
            // Ingest types
            SignalSample,
            RawSignalSample,
            SampleAccepted,
            DisconnectedRequest,
            LocationFix,
            LocationUpdateRequest,
            LocationUpdateResponse,
            // Config types
            ConfigResponse,
            UpdateThresholdRequest,
            UpdateGraceRequest,
            UpdateContactRequest,
            UpdateConfigResponse,
        )
    )
)]
pub struct ApiDoc;

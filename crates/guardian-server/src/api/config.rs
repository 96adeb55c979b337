//! Configuration API endpoints.
//!
//! Provides endpoints for reading and updating the user-adjustable monitor
//! settings: RSSI threshold, grace period and emergency contact. Updates are
//! validated, applied to the running monitor, then persisted. A persistence
//! failure is logged and reported in the response, but the new value stays
//! in effect.

use axum::extract::State;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use guardian_core::settings::{save_contact, save_grace, save_threshold};
use guardian_core::{AlertProfile, EmergencyContact, GraceDuration, SettingsError, Threshold};

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the config router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/config", get(get_config))
        .route("/config/threshold", put(update_threshold))
        .route("/config/grace", put(update_grace))
        .route("/config/contact", put(update_contact))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Current configuration response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "rssi_threshold": -70,
    "grace_secs": 10,
    "emergency_contact": "+4915112345678",
    "profile": "primary",
    "relay_configured": true,
    "retry_backoff_secs": 60,
    "max_attempts": null
}))]
pub struct ConfigResponse {
    /// Out-of-range threshold in dBm.
    #[schema(example = -70)]
    pub rssi_threshold: i16,

    /// Grace period in seconds.
    #[schema(example = 10)]
    pub grace_secs: u64,

    /// Emergency contact, if configured.
    #[schema(example = "+4915112345678")]
    pub emergency_contact: Option<String>,

    /// Alert profile.
    pub profile: AlertProfile,

    /// Whether a messaging relay is configured.
    #[schema(example = true)]
    pub relay_configured: bool,

    /// Wait between notification attempts.
    #[schema(example = 60)]
    pub retry_backoff_secs: u64,

    /// Attempt limit per alarm; null retries until the alarm is reset.
    pub max_attempts: Option<u32>,
}

/// Request to update the threshold.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "rssi_threshold": -75
}))]
pub struct UpdateThresholdRequest {
    /// Threshold in dBm (-100 to -20).
    #[schema(example = -75, minimum = -100, maximum = -20)]
    pub rssi_threshold: i16,
}

/// Request to update the grace period.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "grace_secs": 10
}))]
pub struct UpdateGraceRequest {
    /// Grace period in seconds (1 to 3600).
    #[schema(example = 10, minimum = 1, maximum = 3600)]
    pub grace_secs: u64,
}

/// Request to set or clear the emergency contact.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "emergency_contact": "+49 151 12345678"
}))]
pub struct UpdateContactRequest {
    /// Phone number, or null to clear.
    pub emergency_contact: Option<String>,
}

/// Response after a settings update.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateConfigResponse {
    /// Whether the update was applied.
    pub success: bool,

    /// Whether the value was written to the settings store. When `false`
    /// the value is in effect until the next restart only.
    pub persisted: bool,

    /// Configuration after the update.
    pub config: ConfigResponse,
}

// ============================================================================
// Handlers
// ============================================================================

fn current_config(state: &SharedState) -> ConfigResponse {
    let status = state.guardian().status();
    let notification = &state.config().notification;

    ConfigResponse {
        rssi_threshold: status.rssi_threshold.dbm(),
        grace_secs: status.grace_secs.secs(),
        emergency_contact: status.emergency_contact.map(String::from),
        profile: status.profile,
        relay_configured: notification.relay_url.is_some(),
        retry_backoff_secs: notification.retry_backoff_secs,
        max_attempts: notification.max_attempts,
    }
}

fn persist_outcome(setting: &str, result: Result<(), SettingsError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(setting, error = %e, "Failed to persist setting; keeping it in memory only");
            false
        }
    }
}

fn updated(state: &SharedState, persisted: bool) -> Json<UpdateConfigResponse> {
    Json(UpdateConfigResponse {
        success: true,
        persisted,
        config: current_config(state),
    })
}

/// Get current configuration.
#[utoipa::path(
    get,
    path = "/api/config",
    tag = "config",
    operation_id = "getConfig",
    summary = "Get current configuration",
    description = "Returns the settings in effect: threshold, grace period, emergency \
        contact, alert profile and notification policy.",
    responses(
        (status = 200, description = "Configuration retrieved", body = ConfigResponse)
    )
)]
pub async fn get_config(State(state): State<SharedState>) -> Json<ConfigResponse> {
    Json(current_config(&state))
}

/// Update the RSSI threshold.
#[utoipa::path(
    put,
    path = "/api/config/threshold",
    tag = "config",
    operation_id = "updateThreshold",
    summary = "Update RSSI threshold",
    description = "Sets the signal strength below which the beacon counts as out of range. \
        Takes effect from the next sample; past samples are not reclassified.",
    request_body = UpdateThresholdRequest,
    responses(
        (status = 200, description = "Threshold updated", body = UpdateConfigResponse),
        (status = 400, description = "Threshold out of range; previous value kept", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn update_threshold(
    State(state): State<SharedState>,
    Json(request): Json<UpdateThresholdRequest>,
) -> ApiResult<Json<UpdateConfigResponse>> {
    let threshold = Threshold::new(request.rssi_threshold)?;
    state.guardian().set_threshold(threshold).await?;

    let persisted = persist_outcome(
        "rssi_threshold",
        save_threshold(state.settings(), threshold).await,
    );
    Ok(updated(&state, persisted))
}

/// Update the grace period.
#[utoipa::path(
    put,
    path = "/api/config/grace",
    tag = "config",
    operation_id = "updateGrace",
    summary = "Update grace period",
    description = "Sets how long the beacon must stay out of range before the alarm fires. \
        A running countdown keeps the time already elapsed.",
    request_body = UpdateGraceRequest,
    responses(
        (status = 200, description = "Grace period updated", body = UpdateConfigResponse),
        (status = 400, description = "Grace period out of range; previous value kept", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn update_grace(
    State(state): State<SharedState>,
    Json(request): Json<UpdateGraceRequest>,
) -> ApiResult<Json<UpdateConfigResponse>> {
    let grace = GraceDuration::from_secs(request.grace_secs)?;
    state.guardian().set_grace(grace).await?;

    let persisted = persist_outcome("grace_secs", save_grace(state.settings(), grace).await);
    Ok(updated(&state, persisted))
}

/// Set or clear the emergency contact.
#[utoipa::path(
    put,
    path = "/api/config/contact",
    tag = "config",
    operation_id = "updateContact",
    summary = "Update emergency contact",
    description = "Sets the phone number notified when an alarm fires, or clears it with null. \
        Without a contact, alarms still sound locally but no message is sent.",
    request_body = UpdateContactRequest,
    responses(
        (status = 200, description = "Contact updated", body = UpdateConfigResponse),
        (status = 400, description = "Not a phone number; previous value kept", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn update_contact(
    State(state): State<SharedState>,
    Json(request): Json<UpdateContactRequest>,
) -> ApiResult<Json<UpdateConfigResponse>> {
    let contact = request
        .emergency_contact
        .as_deref()
        .map(EmergencyContact::parse)
        .transpose()?;
    state.guardian().set_contact(contact.clone()).await?;

    let persisted = persist_outcome(
        "emergency_contact",
        save_contact(state.settings(), contact.as_ref()).await,
    );
    Ok(updated(&state, persisted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_requests_deserialize() {
        let request: UpdateThresholdRequest =
            serde_json::from_str(r#"{"rssi_threshold": -75}"#).unwrap();
        assert_eq!(request.rssi_threshold, -75);

        let request: UpdateContactRequest =
            serde_json::from_str(r#"{"emergency_contact": null}"#).unwrap();
        assert!(request.emergency_contact.is_none());
    }

    #[test]
    fn test_persisted_reports_failures() {
        assert!(persist_outcome("grace_secs", Ok(())));
        assert!(!persist_outcome(
            "grace_secs",
            Err(SettingsError::InvalidValue {
                key: "grace_secs",
                message: "test".into(),
            })
        ));
    }
}

//! Alarm status and acknowledgement endpoints.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use guardian_core::{AlarmEvent, StatusSnapshot};

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the status router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/alarm/reset", post(reset_alarm))
}

/// Response after an acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "reset": true,
    "status": {
        "alarm": { "state": "idle" },
        "range": "out_of_range",
        "last_sample": { "strength": -82, "timestamp": "2025-01-15T03:30:00Z" },
        "signal_quality": "weak",
        "connected": true,
        "rssi_threshold": -70,
        "grace_secs": 10,
        "profile": "primary",
        "emergency_contact": "+4915112345678",
        "notification_pending": false
    }
}))]
pub struct ResetResponse {
    /// Whether there was anything to reset. `false` when already idle.
    pub reset: bool,

    /// Status after the reset.
    pub status: StatusSnapshot,
}

/// Get the current monitor status.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "alarm",
    operation_id = "getStatus",
    summary = "Get alarm status",
    description = "Returns the alarm state with the live countdown, the latest signal \
        reading and its classification, and the settings in effect.",
    responses(
        (status = 200, description = "Current status", body = StatusSnapshot)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<StatusSnapshot> {
    Json(state.guardian().status())
}

/// Acknowledge the alarm.
#[utoipa::path(
    post,
    path = "/api/alarm/reset",
    tag = "alarm",
    operation_id = "resetAlarm",
    summary = "Acknowledge and clear the alarm",
    description = "Returns the monitor to idle, silences the alert and cancels any pending \
        emergency notification retry. Returning to range alone never clears a raised alarm. \
        Resetting an idle monitor has no effect.",
    responses(
        (status = 200, description = "Reset applied", body = ResetResponse),
        (status = 503, description = "Monitor not running", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn reset_alarm(State(state): State<SharedState>) -> ApiResult<Json<ResetResponse>> {
    let event = state.guardian().reset().await?;
    let reset = matches!(event, Some(AlarmEvent::AlarmReset { .. }));
    if reset {
        info!("Alarm acknowledged over HTTP");
    }

    Ok(Json(ResetResponse {
        reset,
        status: state.guardian().status(),
    }))
}

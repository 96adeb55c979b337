//! Signal sample ingest.
//!
//! The radio bridge posts readings here. Malformed samples are rejected with
//! 400 and never reach the monitor.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use guardian_core::{RawSignalSample, SamplerEvent, SignalSample};

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the samples router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/samples", post(ingest_sample))
        .route("/samples/disconnected", post(report_disconnected))
}

/// Acknowledgement of a queued sampler event.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "accepted": true,
    "strength": -72,
    "timestamp": "2025-01-15T03:30:00Z"
}))]
pub struct SampleAccepted {
    /// Always `true`; rejected samples get an error response.
    pub accepted: bool,

    /// Validated strength in dBm. Absent for a disconnect.
    pub strength: Option<i16>,

    /// Observation time.
    pub timestamp: DateTime<Utc>,
}

/// Optional body for a disconnect report.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct DisconnectedRequest {
    /// When the beacon was lost. Defaults to now.
    pub at: Option<DateTime<Utc>>,
}

/// Ingest one signal-strength reading.
#[utoipa::path(
    post,
    path = "/api/samples",
    tag = "samples",
    operation_id = "ingestSample",
    summary = "Ingest a signal sample",
    description = "Queues a beacon signal-strength reading for classification. Readings are \
        processed in arrival order; duplicates are valid.",
    request_body = RawSignalSample,
    responses(
        (status = 202, description = "Sample queued", body = SampleAccepted),
        (status = 400, description = "Malformed sample", body = crate::api::error::ErrorResponse),
        (status = 429, description = "Sample buffer full", body = crate::api::error::ErrorResponse),
        (status = 503, description = "Sampler stopped", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn ingest_sample(
    State(state): State<SharedState>,
    Json(raw): Json<RawSignalSample>,
) -> ApiResult<(StatusCode, Json<SampleAccepted>)> {
    let sample = SignalSample::try_from(raw).map_err(|e| {
        debug!(error = %e, "Dropping malformed sample");
        e
    })?;
    state.feed().try_push(SamplerEvent::Sample(sample))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SampleAccepted {
            accepted: true,
            strength: Some(sample.strength),
            timestamp: sample.timestamp,
        }),
    ))
}

/// Report that the beacon was lost.
#[utoipa::path(
    post,
    path = "/api/samples/disconnected",
    tag = "samples",
    operation_id = "reportDisconnected",
    summary = "Report beacon loss",
    description = "Signals that the beacon connection was lost entirely. Loss of signal \
        counts as out of range and starts the grace countdown.",
    request_body(content = DisconnectedRequest, description = "Optional; an empty body means now"),
    responses(
        (status = 202, description = "Disconnect queued", body = SampleAccepted),
        (status = 429, description = "Sample buffer full", body = crate::api::error::ErrorResponse),
        (status = 503, description = "Sampler stopped", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn report_disconnected(
    State(state): State<SharedState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SampleAccepted>)> {
    let request: DisconnectedRequest = if body.iter().all(u8::is_ascii_whitespace) {
        DisconnectedRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request("invalid_body", e.to_string()))?
    };
    let at = request.at.unwrap_or_else(Utc::now);
    state.feed().try_push(SamplerEvent::Disconnected { at })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SampleAccepted {
            accepted: true,
            strength: None,
            timestamp: at,
        }),
    ))
}

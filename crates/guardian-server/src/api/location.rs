//! Location fix ingest.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use guardian_core::{LocationFix, LocationProvider};

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the location router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/location", post(update_location).delete(clear_location))
}

/// A position report from the location collaborator.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "latitude": 52.520008,
    "longitude": 13.404954,
    "captured_at": "2025-01-15T03:30:00Z"
}))]
pub struct LocationUpdateRequest {
    /// Degrees north (-90 to 90).
    pub latitude: f64,
    /// Degrees east (-180 to 180).
    pub longitude: f64,
    /// When the position was measured. Defaults to now.
    pub captured_at: Option<DateTime<Utc>>,
}

/// Result of a location update.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LocationUpdateResponse {
    /// `false` when the report was older than the fix already held.
    pub stored: bool,
    /// The fix now in effect.
    pub current: Option<LocationFix>,
}

/// Record the latest location fix.
#[utoipa::path(
    post,
    path = "/api/location",
    tag = "location",
    operation_id = "updateLocation",
    summary = "Report a location fix",
    description = "Stores the newest known position. Emergency notifications and their \
        retries always use the freshest fix available at send time. Reports older than \
        the current fix are ignored.",
    request_body = LocationUpdateRequest,
    responses(
        (status = 200, description = "Fix processed", body = LocationUpdateResponse),
        (status = 400, description = "Coordinates out of range", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn update_location(
    State(state): State<SharedState>,
    Json(request): Json<LocationUpdateRequest>,
) -> ApiResult<Json<LocationUpdateResponse>> {
    let fix = LocationFix::new(
        request.latitude,
        request.longitude,
        request.captured_at.unwrap_or_else(Utc::now),
    )?;
    let stored = state.location().update(fix);

    Ok(Json(LocationUpdateResponse {
        stored,
        current: state.location().latest(),
    }))
}

/// Forget the current location fix.
#[utoipa::path(
    delete,
    path = "/api/location",
    tag = "location",
    operation_id = "clearLocation",
    summary = "Clear the location fix",
    description = "Drops the stored position. Notifications dispatched afterwards report the \
        location as unavailable; a retry already in progress keeps the fix it last sent.",
    responses(
        (status = 204, description = "Fix cleared")
    )
)]
pub async fn clear_location(State(state): State<SharedState>) -> StatusCode {
    state.location().clear();
    StatusCode::NO_CONTENT
}

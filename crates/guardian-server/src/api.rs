//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `status` - Alarm status and acknowledgement
//! - `samples` - Beacon signal ingest from the radio bridge
//! - `location` - Location fix ingest
//! - `config` - Threshold, grace period and contact settings
//! - `health` - Service health checks
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod config;
pub mod error;
pub mod health;
pub mod location;
pub mod openapi;
pub mod samples;
pub mod status;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};

// Re-export OpenAPI utilities for the gen-openapi binary
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                    - Health check
/// /api
/// ├── /status                - Alarm status snapshot
/// ├── /alarm/reset           - Acknowledge the alarm
/// ├── /samples               - Signal sample ingest
/// ├── /samples/disconnected  - Beacon loss report
/// ├── /location              - Location fix update / clear
/// ├── /config                - Settings (threshold, grace, contact)
/// └── /openapi.json          - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest(
            "/api",
            Router::new()
                .merge(status::router())
                .merge(samples::router())
                .merge(location::router())
                .merge(config::router())
                // OpenAPI spec at /api/openapi.json
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - WebSocket upgrade for occupancy subscribers
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        detector_running: state.detector.is_running().await,
        detector_mode: state.detector.mode().to_string(),
        seats: state.catalog.len(),
        subscribers: state.realtime.connection_count(),
    };

    Json(response)
}

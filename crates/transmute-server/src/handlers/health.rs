use axum::Json;
use axum::extract::State;
use serde::Serialize;

use transmute_core::StatusCounts;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Output formats clients may request.
    pub formats: Vec<String>,
    /// Jobs currently known, by status.
    pub jobs: StatusCounts,
}

/// GET /health -- returns service status and job counts.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        formats: state.intake.supported_formats(),
        jobs: state.intake.counts().await,
    })
}

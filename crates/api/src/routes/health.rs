//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sagas: usize,
    pub channels: usize,
}

/// GET /health: liveness plus the number of registered sagas and channels.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sagas: state.registry.saga_names().len(),
        channels: state.relayer.channels().len(),
    })
}

//! Manual relay trigger.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct RelayResponse {
    pub published: usize,
    pub dead_lettered: usize,
    pub replayed: usize,
}

/// POST /relay/execute: runs one relay batch right away.
pub async fn execute(State(state): State<Arc<AppState>>) -> Result<Json<RelayResponse>, ApiError> {
    let summary = state.relayer.execute().await?;

    Ok(Json(RelayResponse {
        published: summary.published,
        dead_lettered: summary.dead_lettered,
        replayed: summary.replayed,
    }))
}

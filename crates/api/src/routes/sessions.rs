//! Session inspection endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::SessionId;
use saga::{Session, SessionArgs, SessionRepository};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub state: String,
    pub current_step: Option<String>,
    pub pending: bool,
    pub created_at: String,
    pub data: SessionArgs,
}

/// GET /sessions/{id}: the current state of a saga session.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session_id = SessionId::new(id);
    let session = state
        .sessions
        .load(&session_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("Session {session_id} not found")))?;

    Ok(Json(SessionResponse {
        id: session.id().to_string(),
        state: session.state().to_string(),
        current_step: session.current_step().map(String::from),
        pending: session.is_pending(),
        created_at: session.created_at().to_rfc3339(),
        data: session.data().clone(),
    }))
}

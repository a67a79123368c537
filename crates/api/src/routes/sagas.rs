//! Saga listing and start endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use saga::SagaError;
use serde::Serialize;
use serde_json::Value;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct SagaListResponse {
    pub sagas: Vec<String>,
}

#[derive(Serialize)]
pub struct SagaStartedResponse {
    pub saga: String,
    pub session_id: String,
}

/// GET /sagas: names of every registered saga.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<SagaListResponse> {
    Json(SagaListResponse {
        sagas: state.registry.saga_names(),
    })
}

/// POST /sagas/{name}: starts a session with the JSON object body as its
/// arguments.
#[tracing::instrument(skip(state, body))]
pub async fn start(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<SagaStartedResponse>), ApiError> {
    let args = match body {
        Value::Object(args) => args,
        other => {
            return Err(SagaError::InvalidSagaStart(format!(
                "arguments must be a JSON object, got {}",
                kind(&other)
            ))
            .into());
        }
    };

    let session_id = state.registry.start_saga(&name, args).await?;
    metrics::counter!("api_sagas_started_total", "saga" => name.clone()).increment(1);

    Ok((
        StatusCode::CREATED,
        Json(SagaStartedResponse {
            saga: name,
            session_id: session_id.to_string(),
        }),
    ))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

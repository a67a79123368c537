//! Saga sessions: the run-time record of one saga execution.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SessionId;
use outbox::Executable;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SagaError};
use crate::state::SessionState;

/// Arguments handed to a [`SessionFactory`] when a saga starts.
pub type SessionArgs = serde_json::Map<String, Value>;

/// Builds a session from start arguments. The `"id"` argument is always present.
pub type SessionFactory<S> = Arc<dyn Fn(SessionArgs) -> Result<S> + Send + Sync>;

/// The mutable state of one running saga.
///
/// Sessions are plain values: the orchestrator loads one, mutates it locally
/// and saves it back wholesale in the same unit of work as the commands it
/// enqueued.
pub trait Session: Clone + Send + Sync + 'static {
    fn id(&self) -> &SessionId;

    /// Name of the step the session is on, `None` before the saga starts.
    fn current_step(&self) -> Option<&str>;

    fn update_current_step(&mut self, step: &str);

    /// True while a response for the current step is awaited.
    fn is_pending(&self) -> bool;

    fn set_pending(&mut self, pending: bool);

    fn state(&self) -> SessionState;

    fn set_state(&mut self, state: SessionState);
}

/// Loads and persists sessions of type `S`.
#[async_trait]
pub trait SessionRepository<S: Session, Tx: Send + 'static>: Send + Sync {
    /// Loads a session. A missing session is `Ok(None)`.
    async fn load(&self, id: &SessionId) -> outbox::Result<Option<S>>;

    fn save(&self, session: &S) -> Executable<Tx>;

    fn delete(&self, session: &S) -> Executable<Tx>;
}

/// A general purpose session that keeps its start arguments as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicSession {
    id: SessionId,
    current_step: Option<String>,
    pending: bool,
    state: SessionState,
    data: SessionArgs,
    created_at: DateTime<Utc>,
}

impl BasicSession {
    /// Creates a session with no arguments.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            current_step: None,
            pending: false,
            state: SessionState::default(),
            data: SessionArgs::new(),
            created_at: Utc::now(),
        }
    }

    /// Builds a session from start arguments, taking its id from `"id"`.
    pub fn from_args(mut args: SessionArgs) -> Result<Self> {
        let id = match args.remove("id") {
            Some(Value::String(id)) if !id.is_empty() => SessionId::new(id),
            Some(Value::String(_)) | Some(Value::Null) | None => {
                return Err(SagaError::SessionIdEmpty);
            }
            Some(other) => {
                return Err(SagaError::SessionCreationFailed(format!(
                    "session id must be a string, got {other}"
                )));
            }
        };

        let mut session = Self::new(id);
        session.data = args;
        Ok(session)
    }

    /// A [`SessionFactory`] for `BasicSession`.
    pub fn factory() -> SessionFactory<Self> {
        Arc::new(Self::from_args)
    }

    pub fn data(&self) -> &SessionArgs {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut SessionArgs {
        &mut self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Session for BasicSession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    fn update_current_step(&mut self, step: &str) {
        self.current_step = Some(step.to_string());
    }

    fn is_pending(&self) -> bool {
        self.pending
    }

    fn set_pending(&mut self, pending: bool) {
        self.pending = pending;
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }
}

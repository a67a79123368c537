//! A saga binds a name, a definition and the session lifecycle hooks.

use std::sync::Arc;

use common::SessionId;
use serde_json::Value;

use crate::definition::Definition;
use crate::error::{Result, SagaError};
use crate::session::{Session, SessionArgs, SessionFactory, SessionRepository};

/// A named saga definition together with its session factory and repository.
pub struct Saga<S: Session, Tx: Send + 'static> {
    name: String,
    definition: Definition<S, Tx>,
    factory: SessionFactory<S>,
    repository: Arc<dyn SessionRepository<S, Tx>>,
}

impl<S: Session, Tx: Send + 'static> Saga<S, Tx> {
    pub fn new(
        name: impl Into<String>,
        definition: Definition<S, Tx>,
        factory: SessionFactory<S>,
        repository: Arc<dyn SessionRepository<S, Tx>>,
    ) -> Self {
        Self {
            name: name.into(),
            definition,
            factory,
            repository,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &Definition<S, Tx> {
        &self.definition
    }

    pub fn repository(&self) -> &Arc<dyn SessionRepository<S, Tx>> {
        &self.repository
    }

    /// Creates a session for a new run of this saga.
    ///
    /// An `"id"` of the form `<name>-<uuid>` is added when the caller did
    /// not supply one.
    pub fn create_session(&self, mut args: SessionArgs) -> Result<S> {
        if args.get("id").is_none_or(Value::is_null) {
            let id = SessionId::generate(&self.name);
            args.insert("id".to_string(), Value::String(id.to_string()));
        }

        let session = (self.factory)(args)?;
        if session.id().is_empty() {
            return Err(SagaError::SessionIdEmpty);
        }

        Ok(session)
    }

    /// True if the session id was generated for this saga.
    pub fn owns_session(&self, session_id: &SessionId) -> bool {
        session_id.saga_name() == self.name
    }
}

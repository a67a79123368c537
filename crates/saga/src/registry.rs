//! The saga registry: starts sagas by name and routes responses to them.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::SessionId;
use outbox::MessagePacket;

use crate::error::{Result, SagaError};
use crate::orchestrator::Orchestrator;
use crate::saga::Saga;
use crate::session::{Session, SessionArgs};

/// A registered saga with its session type erased.
///
/// Lets sagas with different session types share one registry.
#[async_trait]
pub trait RegisteredSaga<Tx: Send + 'static>: Send + Sync {
    fn name(&self) -> &str;

    fn owns_session(&self, session_id: &SessionId) -> bool;

    async fn start(&self, orchestrator: &Orchestrator<Tx>, args: SessionArgs) -> Result<SessionId>;

    async fn orchestrate(&self, orchestrator: &Orchestrator<Tx>, packet: &MessagePacket)
    -> Result<()>;
}

#[async_trait]
impl<S: Session, Tx: Send + 'static> RegisteredSaga<Tx> for Saga<S, Tx> {
    fn name(&self) -> &str {
        Saga::name(self)
    }

    fn owns_session(&self, session_id: &SessionId) -> bool {
        Saga::owns_session(self, session_id)
    }

    async fn start(&self, orchestrator: &Orchestrator<Tx>, args: SessionArgs) -> Result<SessionId> {
        orchestrator.start_saga(self, args).await
    }

    async fn orchestrate(
        &self,
        orchestrator: &Orchestrator<Tx>,
        packet: &MessagePacket,
    ) -> Result<()> {
        orchestrator.orchestrate(self, packet).await
    }
}

/// Holds the registered sagas and the orchestrator that drives them.
///
/// The saga list is guarded by a mutex that is only held while the list is
/// read or changed. Orchestration runs outside the lock, so sessions of
/// different sagas never wait on each other here.
pub struct Registry<Tx: Send + 'static> {
    sagas: Mutex<Vec<Arc<dyn RegisteredSaga<Tx>>>>,
    orchestrator: Orchestrator<Tx>,
}

impl<Tx: Send + 'static> Registry<Tx> {
    pub fn new(orchestrator: Orchestrator<Tx>) -> Self {
        Self {
            sagas: Mutex::new(Vec::new()),
            orchestrator,
        }
    }

    /// Registers a saga.
    ///
    /// Rejects empty names, names containing `-` (they could never match a
    /// session id prefix) and names that are already registered.
    pub fn register<S: Session>(&self, saga: Saga<S, Tx>) -> Result<()> {
        let name = saga.name().to_string();
        if name.is_empty() {
            return Err(SagaError::EmptySagaName);
        }
        if name.contains('-') {
            return Err(SagaError::InvalidSagaName(name));
        }

        let mut sagas = self.lock();
        if sagas.iter().any(|s| s.name() == name) {
            return Err(SagaError::SagaAlreadyRegistered(name));
        }
        sagas.push(Arc::new(saga));

        tracing::info!(saga = %name, "saga registered");
        Ok(())
    }

    pub fn has_saga(&self, name: &str) -> bool {
        self.lock().iter().any(|s| s.name() == name)
    }

    /// Names of every registered saga in registration order.
    pub fn saga_names(&self) -> Vec<String> {
        self.lock().iter().map(|s| s.name().to_string()).collect()
    }

    /// Starts a new session of the named saga and returns its id.
    #[tracing::instrument(skip(self, args), fields(saga = %name))]
    pub async fn start_saga(&self, name: &str, args: SessionArgs) -> Result<SessionId> {
        if name.is_empty() {
            return Err(SagaError::EmptySagaName);
        }

        let saga = self
            .find(name)
            .ok_or_else(|| SagaError::SagaNotFound(name.to_string()))?;

        saga.start(&self.orchestrator, args).await
    }

    /// Routes a response to every saga owning its session.
    ///
    /// Matching sagas are orchestrated one after another; the first error
    /// stops the walk and is returned.
    #[tracing::instrument(
        skip(self, packet),
        fields(session_id = %packet.payload().session_id, origin = %packet.origin())
    )]
    pub async fn consume_message(&self, packet: MessagePacket) -> Result<()> {
        let session_id = &packet.payload().session_id;
        let targets: Vec<Arc<dyn RegisteredSaga<Tx>>> = self
            .lock()
            .iter()
            .filter(|s| s.owns_session(session_id))
            .cloned()
            .collect();

        if targets.is_empty() {
            tracing::debug!("no saga owns this session");
        }

        for saga in targets {
            if let Err(e) = saga.orchestrate(&self.orchestrator, &packet).await {
                tracing::warn!(saga = saga.name(), error = %e, "orchestration failed");
                return Err(e);
            }
        }

        Ok(())
    }

    fn find(&self, name: &str) -> Option<Arc<dyn RegisteredSaga<Tx>>> {
        self.lock().iter().find(|s| s.name() == name).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn RegisteredSaga<Tx>>>> {
        self.sagas.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Registers a saga into a registry.
pub fn register_saga_to<S: Session, Tx: Send + 'static>(
    registry: &Registry<Tx>,
    saga: Saga<S, Tx>,
) -> Result<()> {
    registry.register(saga)
}

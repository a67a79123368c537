use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::SessionId;
use outbox::{Executable, InMemoryTx};
use tokio::sync::RwLock;

use crate::session::{Session, SessionRepository};

/// In-memory session repository for testing and the demo server.
///
/// Writes are staged on the [`InMemoryTx`] and become visible when the unit
/// of work commits.
pub struct InMemorySessionRepository<S: Session> {
    sessions: Arc<RwLock<HashMap<SessionId, S>>>,
}

impl<S: Session> InMemorySessionRepository<S> {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns every stored session.
    pub async fn load_all(&self) -> Vec<S> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Clears all sessions.
    pub async fn clear(&self) {
        self.sessions.write().await.clear();
    }
}

impl<S: Session> Default for InMemorySessionRepository<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Session> Clone for InMemorySessionRepository<S> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
        }
    }
}

#[async_trait]
impl<S: Session> SessionRepository<S, InMemoryTx> for InMemorySessionRepository<S> {
    async fn load(&self, id: &SessionId) -> outbox::Result<Option<S>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    fn save(&self, session: &S) -> Executable<InMemoryTx> {
        let sessions = Arc::clone(&self.sessions);
        let session = session.clone();
        Executable::new(move |tx: &mut InMemoryTx| {
            Box::pin(async move {
                tx.stage(async move {
                    sessions
                        .write()
                        .await
                        .insert(session.id().clone(), session);
                });
                Ok(())
            })
        })
    }

    fn delete(&self, session: &S) -> Executable<InMemoryTx> {
        let sessions = Arc::clone(&self.sessions);
        let id = session.id().clone();
        Executable::new(move |tx: &mut InMemoryTx| {
            Box::pin(async move {
                tx.stage(async move {
                    sessions.write().await.remove(&id);
                });
                Ok(())
            })
        })
    }
}

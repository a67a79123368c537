use std::sync::Arc;

use async_trait::async_trait;
use common::ChannelName;
use outbox::{Channel, Message, MessagePacket, MessageRepository, OutboxError};

use crate::registry::Registry;

/// A response channel that feeds messages back into a [`Registry`].
///
/// Sending wraps the message in a packet whose origin is this channel's name
/// and hands it to [`Registry::consume_message`]. An orchestration error is
/// reported as a delivery failure, so the relay dead-letters the response.
pub struct RegistryChannel<Tx: Send + 'static> {
    name: ChannelName,
    registry: Arc<Registry<Tx>>,
    repository: Arc<dyn MessageRepository<Tx>>,
}

impl<Tx: Send + 'static> RegistryChannel<Tx> {
    pub fn new(
        name: impl Into<ChannelName>,
        registry: Arc<Registry<Tx>>,
        repository: Arc<dyn MessageRepository<Tx>>,
    ) -> Self {
        Self {
            name: name.into(),
            registry,
            repository,
        }
    }
}

#[async_trait]
impl<Tx: Send + 'static> Channel<Tx> for RegistryChannel<Tx> {
    fn name(&self) -> &ChannelName {
        &self.name
    }

    async fn send(&self, message: Message) -> outbox::Result<()> {
        let packet = MessagePacket::new(self.name.clone(), message);
        self.registry
            .consume_message(packet)
            .await
            .map_err(|e| OutboxError::delivery(&self.name, e))
    }

    fn repository(&self) -> Arc<dyn MessageRepository<Tx>> {
        Arc::clone(&self.repository)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::DefinitionBuilder;
    use crate::endpoint::{Endpoint, MessageConstructor};
    use crate::memory::InMemorySessionRepository;
    use crate::orchestrator::Orchestrator;
    use crate::saga::Saga;
    use crate::session::{BasicSession, Session, SessionArgs, SessionRepository};
    use crate::state::SessionState;
    use common::SessionId;
    use outbox::{InMemoryMessageRepository, InMemoryTx, InMemoryTxHandler, UnitOfWorkFactory};

    #[tokio::test]
    async fn test_send_routes_response_to_saga() {
        let registry = Arc::new(Registry::new(Orchestrator::new(UnitOfWorkFactory::new(
            Arc::new(InMemoryTxHandler::new()),
        ))));
        let sessions = InMemorySessionRepository::<BasicSession>::new();
        let responses = InMemoryMessageRepository::new();
        let ctor: MessageConstructor<BasicSession> =
            Arc::new(|s: &BasicSession| Message::new(s.id().clone(), "command"));
        let endpoint: Endpoint<BasicSession, InMemoryTx> = Endpoint::new(
            "Command",
            ctor.clone(),
            Arc::new(InMemoryMessageRepository::new()),
            "Success",
            ctor.clone(),
            "Failure",
            ctor,
        );
        let definition = DefinitionBuilder::new()
            .step("a")
            .invoke(endpoint)
            .build()
            .unwrap();
        registry
            .register(Saga::new(
                "Order",
                definition,
                BasicSession::factory(),
                Arc::new(sessions.clone()),
            ))
            .unwrap();
        let id = registry.start_saga("Order", SessionArgs::new()).await.unwrap();

        let success = RegistryChannel::new("Success", registry.clone(), Arc::new(responses));
        success
            .send(Message::new(id.clone(), "reply"))
            .await
            .unwrap();

        let session = sessions.load(&id).await.unwrap().unwrap();
        assert_eq!(session.state(), SessionState::Completed);

        let again = success.send(Message::new(id.clone(), "reply")).await;
        assert!(matches!(again, Err(OutboxError::Delivery { .. })));

        let unknown = success
            .send(Message::new(SessionId::new("Order-missing"), "reply"))
            .await;
        assert!(matches!(unknown, Err(OutboxError::Delivery { .. })));
    }
}

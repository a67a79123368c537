//! The orchestrator state machine.
//!
//! Every public entry point runs inside one fresh unit of work: the session
//! mutation and the commands it produces are committed together, and
//! nothing is sent over the network here. Commands only land in outboxes
//! for the relay to deliver.

use common::{ChannelName, SessionId};
use outbox::{MessagePacket, UnitOfWork, UnitOfWorkFactory};

use crate::definition::Definition;
use crate::error::{Result, SagaError};
use crate::saga::Saga;
use crate::session::{Session, SessionArgs};
use crate::state::SessionState;
use crate::step::Step;

/// Outcome reported by a response channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Response {
    Success,
    Failure,
}

/// Drives sessions through their saga definitions.
pub struct Orchestrator<Tx: Send + 'static> {
    uow_factory: UnitOfWorkFactory<Tx>,
}

impl<Tx: Send + 'static> Orchestrator<Tx> {
    pub fn new(uow_factory: UnitOfWorkFactory<Tx>) -> Self {
        Self { uow_factory }
    }

    /// Creates a session and invokes the first invocable step.
    ///
    /// Leading steps without an invocation are skipped. A saga whose steps
    /// are all non-invocable completes immediately.
    #[tracing::instrument(skip(self, saga, args), fields(saga = %saga.name()))]
    pub async fn start_saga<S: Session>(
        &self,
        saga: &Saga<S, Tx>,
        args: SessionArgs,
    ) -> Result<SessionId> {
        let mut session = saga.create_session(args)?;
        let definition = saga.definition();
        let first_step = definition.first_step().ok_or(SagaError::SagaHasNoSteps)?;

        session.update_current_step(first_step.name());

        let mut uow = self.uow_factory.create();
        if first_step.is_invocable() {
            self.invoke_step(&mut session, first_step, &mut uow)?;
        } else {
            self.step_forward_and_invoke(&mut session, first_step, definition, &mut uow)?;
        }

        uow.add_work_unit(saga.repository().save(&session))?;
        uow.commit().await?;

        metrics::counter!("saga_started_total", "saga" => saga.name().to_string()).increment(1);
        tracing::info!(
            session_id = %session.id(),
            step = session.current_step().unwrap_or_default(),
            state = %session.state(),
            "saga started"
        );
        if session.state() == SessionState::Completed {
            metrics::counter!("saga_completed_total", "saga" => saga.name().to_string())
                .increment(1);
        }

        Ok(session.id().clone())
    }

    /// Reacts to one response message for a session of this saga.
    ///
    /// The origin channel of the packet decides whether the response is a
    /// success or a failure of the current step's invocation (or
    /// compensation, while compensating).
    #[tracing::instrument(
        skip(self, saga, packet),
        fields(saga = %saga.name(), session_id = %packet.payload().session_id, origin = %packet.origin())
    )]
    pub async fn orchestrate<S: Session>(
        &self,
        saga: &Saga<S, Tx>,
        packet: &MessagePacket,
    ) -> Result<()> {
        let origin = packet.origin();
        if origin.is_empty() {
            return Err(SagaError::UnknownMessageOrigin {
                origin: origin.clone(),
                step: String::new(),
            });
        }

        let session_id = &packet.payload().session_id;
        let mut session = saga
            .repository()
            .load(session_id)
            .await?
            .ok_or_else(|| SagaError::SessionNotFound(session_id.clone()))?;

        if session.state().is_terminal() {
            return Err(SagaError::DeadSession {
                session_id: session_id.clone(),
                state: session.state(),
            });
        }

        let definition = saga.definition();
        let current_name = session.current_step().unwrap_or_default().to_string();
        let current = definition
            .find_step(&current_name)
            .ok_or(SagaError::StepDefinitionMismatch { step: current_name })?;

        metrics::counter!("saga_orchestrations_total", "saga" => saga.name().to_string())
            .increment(1);

        let mut uow = self.uow_factory.create();
        if session.state().is_compensating() {
            self.handle_compensation_response(&mut session, origin, current, definition, &mut uow)?;
        } else {
            self.handle_invocation_response(&mut session, origin, current, definition, &mut uow)?;
        }

        uow.add_work_unit(saga.repository().save(&session))?;
        uow.commit().await?;

        match session.state() {
            SessionState::Completed => {
                metrics::counter!("saga_completed_total", "saga" => saga.name().to_string())
                    .increment(1);
                tracing::info!(session_id = %session.id(), "saga completed");
            }
            SessionState::Failed => {
                metrics::counter!("saga_failed_total", "saga" => saga.name().to_string())
                    .increment(1);
                tracing::info!(session_id = %session.id(), "saga failed");
            }
            state => {
                tracing::debug!(
                    session_id = %session.id(),
                    step = session.current_step().unwrap_or_default(),
                    state = %state,
                    pending = session.is_pending(),
                    "session advanced"
                );
            }
        }

        Ok(())
    }

    fn handle_invocation_response<S: Session>(
        &self,
        session: &mut S,
        origin: &ChannelName,
        current: &Step<S, Tx>,
        definition: &Definition<S, Tx>,
        uow: &mut UnitOfWork<Tx>,
    ) -> Result<()> {
        session.set_pending(false);

        match classify(origin, current, current.invocation_channels())? {
            Response::Success => self.step_forward_and_invoke(session, current, definition, uow),
            Response::Failure if current.must_be_completed() => {
                self.retry_invocation(session, current, uow)
            }
            Response::Failure => {
                self.step_backward_and_compensate(session, current, definition, uow)
            }
        }
    }

    fn handle_compensation_response<S: Session>(
        &self,
        session: &mut S,
        origin: &ChannelName,
        current: &Step<S, Tx>,
        definition: &Definition<S, Tx>,
        uow: &mut UnitOfWork<Tx>,
    ) -> Result<()> {
        session.set_pending(false);

        match classify(origin, current, current.compensation_channels())? {
            Response::Success => {
                self.step_backward_and_compensate(session, current, definition, uow)
            }
            Response::Failure => self.retry_compensation(session, current, uow),
        }
    }

    fn invoke_step<S: Session>(
        &self,
        session: &mut S,
        step: &Step<S, Tx>,
        uow: &mut UnitOfWork<Tx>,
    ) -> Result<()> {
        uow.add_work_unit(step.invoke(session)?)?;
        session.set_pending(true);
        Ok(())
    }

    fn compensate_step<S: Session>(
        &self,
        session: &mut S,
        step: &Step<S, Tx>,
        uow: &mut UnitOfWork<Tx>,
    ) -> Result<()> {
        uow.add_work_unit(step.compensate(session)?)?;
        session.set_pending(true);
        Ok(())
    }

    fn retry_invocation<S: Session>(
        &self,
        session: &mut S,
        step: &Step<S, Tx>,
        uow: &mut UnitOfWork<Tx>,
    ) -> Result<()> {
        if !step.must_be_completed() {
            return Err(SagaError::RetryOnNonRetryableStep(step.name().to_string()));
        }

        metrics::counter!("saga_retries_total").increment(1);
        tracing::warn!(session_id = %session.id(), step = step.name(), "retrying step");
        session.set_state(SessionState::IsRetrying);
        self.invoke_step(session, step, uow)
    }

    fn retry_compensation<S: Session>(
        &self,
        session: &mut S,
        step: &Step<S, Tx>,
        uow: &mut UnitOfWork<Tx>,
    ) -> Result<()> {
        tracing::warn!(session_id = %session.id(), step = step.name(), "retrying compensation");
        session.set_state(SessionState::IsCompensating);
        self.compensate_step(session, step, uow)
    }

    /// Moves to the next invocable step and invokes it, or completes the session.
    fn step_forward_and_invoke<S: Session>(
        &self,
        session: &mut S,
        from: &Step<S, Tx>,
        definition: &Definition<S, Tx>,
        uow: &mut UnitOfWork<Tx>,
    ) -> Result<()> {
        let mut current = from;
        loop {
            let Some(next) = definition.next_step(current.name()) else {
                session.set_state(SessionState::Completed);
                return Ok(());
            };

            session.update_current_step(next.name());
            if next.is_invocable() {
                session.set_state(SessionState::Common);
                return self.invoke_step(session, next, uow);
            }
            current = next;
        }
    }

    /// Moves to the nearest earlier compensable step and compensates it, or
    /// fails the session when none is left.
    fn step_backward_and_compensate<S: Session>(
        &self,
        session: &mut S,
        from: &Step<S, Tx>,
        definition: &Definition<S, Tx>,
        uow: &mut UnitOfWork<Tx>,
    ) -> Result<()> {
        let mut current = from;
        loop {
            let Some(prev) = definition.prev_step(current.name()) else {
                session.set_state(SessionState::Failed);
                return Ok(());
            };

            session.update_current_step(prev.name());
            if prev.is_compensable() {
                if !session.state().is_compensating() {
                    metrics::counter!("saga_compensations_total").increment(1);
                    tracing::warn!(session_id = %session.id(), step = prev.name(), "compensating");
                }
                session.set_state(SessionState::IsCompensating);
                return self.compensate_step(session, prev, uow);
            }
            current = prev;
        }
    }
}

/// Classifies a response origin against a step's (success, failure) channels.
///
/// The failure channel is checked first. Empty channel names never match.
fn classify<S: Session, Tx: Send + 'static>(
    origin: &ChannelName,
    step: &Step<S, Tx>,
    channels: Option<(&ChannelName, &ChannelName)>,
) -> Result<Response> {
    if let Some((success, failure)) = channels {
        if !failure.is_empty() && origin == failure {
            return Ok(Response::Failure);
        }
        if !success.is_empty() && origin == success {
            return Ok(Response::Success);
        }
    }

    Err(SagaError::UnknownMessageOrigin {
        origin: origin.clone(),
        step: step.name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::DefinitionBuilder;
    use crate::endpoint::{Endpoint, LocalEndpoint, MessageConstructor};
    use crate::memory::InMemorySessionRepository;
    use crate::session::BasicSession;
    use crate::session::SessionRepository;
    use outbox::{Executable, InMemoryMessageRepository, InMemoryTx, InMemoryTxHandler, Message};
    use std::sync::Arc;

    struct Fixture {
        orchestrator: Orchestrator<InMemoryTx>,
        sessions: InMemorySessionRepository<BasicSession>,
        commands: InMemoryMessageRepository,
        tx: InMemoryTxHandler,
    }

    impl Fixture {
        fn new() -> Self {
            let tx = InMemoryTxHandler::new();
            Self {
                orchestrator: Orchestrator::new(UnitOfWorkFactory::new(Arc::new(tx.clone()))),
                sessions: InMemorySessionRepository::new(),
                commands: InMemoryMessageRepository::new(),
                tx,
            }
        }

        fn endpoint(&self, prefix: &str) -> Endpoint<BasicSession, InMemoryTx> {
            let trigger = format!("{prefix}Command");
            let ctor: MessageConstructor<BasicSession> = Arc::new(move |s: &BasicSession| {
                Message::new(s.id().clone(), trigger.clone())
            });
            Endpoint::new(
                format!("{prefix}Command"),
                ctor.clone(),
                Arc::new(self.commands.clone()),
                format!("{prefix}Success"),
                ctor.clone(),
                format!("{prefix}Failure"),
                ctor,
            )
        }

        fn saga(
            &self,
            definition: crate::definition::Definition<BasicSession, InMemoryTx>,
        ) -> Saga<BasicSession, InMemoryTx> {
            Saga::new(
                "Test",
                definition,
                BasicSession::factory(),
                Arc::new(self.sessions.clone()),
            )
        }

        async fn session(&self, id: &SessionId) -> BasicSession {
            self.sessions.load(id).await.unwrap().unwrap()
        }

        async fn respond(
            &self,
            saga: &Saga<BasicSession, InMemoryTx>,
            id: &SessionId,
            origin: &str,
        ) -> Result<()> {
            let packet = MessagePacket::new(
                ChannelName::from(origin),
                Message::new(id.clone(), "response"),
            );
            self.orchestrator.orchestrate(saga, &packet).await
        }

        async fn command_triggers(&self) -> Vec<String> {
            self.commands
                .outbox_messages()
                .await
                .into_iter()
                .map(|m| m.trigger)
                .collect()
        }
    }

    #[tokio::test]
    async fn test_start_invokes_first_step() {
        let fx = Fixture::new();
        let saga = fx.saga(
            DefinitionBuilder::new()
                .step("a")
                .invoke(fx.endpoint("A"))
                .build()
                .unwrap(),
        );

        let id = fx.orchestrator.start_saga(&saga, SessionArgs::new()).await.unwrap();

        let session = fx.session(&id).await;
        assert_eq!(session.current_step(), Some("a"));
        assert!(session.is_pending());
        assert_eq!(session.state(), SessionState::Common);
        assert_eq!(fx.command_triggers().await, vec!["ACommand"]);
        assert_eq!(fx.tx.committed(), 1);
    }

    #[tokio::test]
    async fn test_start_skips_leading_markers() {
        let fx = Fixture::new();
        let saga = fx.saga(
            DefinitionBuilder::new()
                .step("m1")
                .marker()
                .step("m2")
                .marker()
                .step("b")
                .invoke(fx.endpoint("B"))
                .build()
                .unwrap(),
        );

        let id = fx.orchestrator.start_saga(&saga, SessionArgs::new()).await.unwrap();

        let session = fx.session(&id).await;
        assert_eq!(session.current_step(), Some("b"));
        assert!(session.is_pending());
        assert_eq!(fx.command_triggers().await, vec!["BCommand"]);
    }

    #[tokio::test]
    async fn test_start_completes_when_nothing_is_invocable() {
        let fx = Fixture::new();
        let saga = fx.saga(
            DefinitionBuilder::new()
                .step("m1")
                .marker()
                .step("m2")
                .marker()
                .build()
                .unwrap(),
        );

        let id = fx.orchestrator.start_saga(&saga, SessionArgs::new()).await.unwrap();

        let session = fx.session(&id).await;
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.current_step(), Some("m2"));
        assert!(!session.is_pending());
    }

    #[tokio::test]
    async fn test_start_with_empty_definition_fails() {
        let fx = Fixture::new();
        let saga = fx.saga(crate::definition::Definition::new(Vec::new()));

        let result = fx.orchestrator.start_saga(&saga, SessionArgs::new()).await;

        assert!(matches!(result, Err(SagaError::SagaHasNoSteps)));
        assert!(fx.sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_success_advances_and_completes() {
        let fx = Fixture::new();
        let saga = fx.saga(
            DefinitionBuilder::new()
                .step("a")
                .invoke(fx.endpoint("A"))
                .step("b")
                .invoke(fx.endpoint("B"))
                .build()
                .unwrap(),
        );
        let id = fx.orchestrator.start_saga(&saga, SessionArgs::new()).await.unwrap();

        fx.respond(&saga, &id, "ASuccess").await.unwrap();
        let session = fx.session(&id).await;
        assert_eq!(session.current_step(), Some("b"));
        assert!(session.is_pending());
        assert_eq!(session.state(), SessionState::Common);

        fx.respond(&saga, &id, "BSuccess").await.unwrap();
        let session = fx.session(&id).await;
        assert_eq!(session.current_step(), Some("b"));
        assert!(!session.is_pending());
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(fx.command_triggers().await, vec!["ACommand", "BCommand"]);
    }

    #[tokio::test]
    async fn test_failure_walks_back_to_nearest_compensable_step() {
        let fx = Fixture::new();
        let saga = fx.saga(
            DefinitionBuilder::new()
                .step("s1")
                .invoke(fx.endpoint("S1"))
                .with_compensation(fx.endpoint("Undo1"))
                .step("s2")
                .invoke(fx.endpoint("S2"))
                .step("s3")
                .invoke(fx.endpoint("S3"))
                .build()
                .unwrap(),
        );
        let id = fx.orchestrator.start_saga(&saga, SessionArgs::new()).await.unwrap();
        fx.respond(&saga, &id, "S1Success").await.unwrap();
        fx.respond(&saga, &id, "S2Success").await.unwrap();

        fx.respond(&saga, &id, "S3Failure").await.unwrap();

        let session = fx.session(&id).await;
        assert_eq!(session.current_step(), Some("s1"));
        assert_eq!(session.state(), SessionState::IsCompensating);
        assert!(session.is_pending());
        assert_eq!(
            fx.command_triggers().await.last().map(String::as_str),
            Some("Undo1Command")
        );
    }

    #[tokio::test]
    async fn test_compensation_success_fails_session() {
        let fx = Fixture::new();
        let saga = fx.saga(
            DefinitionBuilder::new()
                .step("s1")
                .invoke(fx.endpoint("S1"))
                .with_compensation(fx.endpoint("Undo1"))
                .step("s2")
                .invoke(fx.endpoint("S2"))
                .build()
                .unwrap(),
        );
        let id = fx.orchestrator.start_saga(&saga, SessionArgs::new()).await.unwrap();
        fx.respond(&saga, &id, "S1Success").await.unwrap();
        fx.respond(&saga, &id, "S2Failure").await.unwrap();

        fx.respond(&saga, &id, "Undo1Success").await.unwrap();

        let session = fx.session(&id).await;
        assert_eq!(session.current_step(), Some("s1"));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!session.is_pending());
    }

    #[tokio::test]
    async fn test_compensation_failure_retries_compensation() {
        let fx = Fixture::new();
        let saga = fx.saga(
            DefinitionBuilder::new()
                .step("s1")
                .invoke(fx.endpoint("S1"))
                .with_compensation(fx.endpoint("Undo1"))
                .step("s2")
                .invoke(fx.endpoint("S2"))
                .build()
                .unwrap(),
        );
        let id = fx.orchestrator.start_saga(&saga, SessionArgs::new()).await.unwrap();
        fx.respond(&saga, &id, "S1Success").await.unwrap();
        fx.respond(&saga, &id, "S2Failure").await.unwrap();

        fx.respond(&saga, &id, "Undo1Failure").await.unwrap();
        fx.respond(&saga, &id, "Undo1Failure").await.unwrap();

        let session = fx.session(&id).await;
        assert_eq!(session.current_step(), Some("s1"));
        assert_eq!(session.state(), SessionState::IsCompensating);
        assert!(session.is_pending());
        let undo_count = fx
            .command_triggers()
            .await
            .iter()
            .filter(|t| *t == "Undo1Command")
            .count();
        assert_eq!(undo_count, 3);
    }

    #[tokio::test]
    async fn test_failure_without_compensable_step_fails_session() {
        let fx = Fixture::new();
        let saga = fx.saga(
            DefinitionBuilder::new()
                .step("a")
                .invoke(fx.endpoint("A"))
                .build()
                .unwrap(),
        );
        let id = fx.orchestrator.start_saga(&saga, SessionArgs::new()).await.unwrap();

        fx.respond(&saga, &id, "AFailure").await.unwrap();

        let session = fx.session(&id).await;
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.current_step(), Some("a"));
        assert!(!session.is_pending());
    }

    #[tokio::test]
    async fn test_retry_keeps_step_and_state() {
        let fx = Fixture::new();
        let saga = fx.saga(
            DefinitionBuilder::new()
                .step("a")
                .invoke(fx.endpoint("A"))
                .retry()
                .build()
                .unwrap(),
        );
        let id = fx.orchestrator.start_saga(&saga, SessionArgs::new()).await.unwrap();

        for _ in 0..5 {
            fx.respond(&saga, &id, "AFailure").await.unwrap();
            let session = fx.session(&id).await;
            assert_eq!(session.state(), SessionState::IsRetrying);
            assert_eq!(session.current_step(), Some("a"));
            assert!(session.is_pending());
        }
        assert_eq!(fx.command_triggers().await.len(), 6);
    }

    #[tokio::test]
    async fn test_success_after_retry_resets_state() {
        let fx = Fixture::new();
        let saga = fx.saga(
            DefinitionBuilder::new()
                .step("a")
                .invoke(fx.endpoint("A"))
                .retry()
                .step("b")
                .invoke(fx.endpoint("B"))
                .build()
                .unwrap(),
        );
        let id = fx.orchestrator.start_saga(&saga, SessionArgs::new()).await.unwrap();
        fx.respond(&saga, &id, "AFailure").await.unwrap();

        fx.respond(&saga, &id, "ASuccess").await.unwrap();

        let session = fx.session(&id).await;
        assert_eq!(session.current_step(), Some("b"));
        assert_eq!(session.state(), SessionState::Common);
    }

    #[tokio::test]
    async fn test_rejections_leave_session_untouched() {
        let fx = Fixture::new();
        let saga = fx.saga(
            DefinitionBuilder::new()
                .step("a")
                .invoke(fx.endpoint("A"))
                .build()
                .unwrap(),
        );
        let id = fx.orchestrator.start_saga(&saga, SessionArgs::new()).await.unwrap();
        let before = fx.session(&id).await;

        assert!(matches!(
            fx.respond(&saga, &id, "").await,
            Err(SagaError::UnknownMessageOrigin { .. })
        ));
        assert!(matches!(
            fx.respond(&saga, &id, "Elsewhere").await,
            Err(SagaError::UnknownMessageOrigin { .. })
        ));
        assert!(matches!(
            fx.respond(&saga, &SessionId::new("Test-missing"), "ASuccess").await,
            Err(SagaError::SessionNotFound(_))
        ));

        assert_eq!(fx.session(&id).await, before);
    }

    #[tokio::test]
    async fn test_terminal_session_rejects_responses() {
        let fx = Fixture::new();
        let saga = fx.saga(
            DefinitionBuilder::new()
                .step("a")
                .invoke(fx.endpoint("A"))
                .build()
                .unwrap(),
        );
        let id = fx.orchestrator.start_saga(&saga, SessionArgs::new()).await.unwrap();
        fx.respond(&saga, &id, "ASuccess").await.unwrap();

        let result = fx.respond(&saga, &id, "ASuccess").await;

        assert!(matches!(
            result,
            Err(SagaError::DeadSession {
                state: SessionState::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_current_step_is_rejected() {
        let fx = Fixture::new();
        let saga = fx.saga(
            DefinitionBuilder::new()
                .step("a")
                .invoke(fx.endpoint("A"))
                .build()
                .unwrap(),
        );
        let mut session = BasicSession::new(SessionId::new("Test-stale"));
        session.update_current_step("removed");
        let mut uow = UnitOfWork::new(Arc::new(fx.tx.clone()));
        uow.add_work_unit(fx.sessions.save(&session)).unwrap();
        uow.commit().await.unwrap();

        let result = fx.respond(&saga, session.id(), "ASuccess").await;

        assert!(matches!(result, Err(SagaError::StepDefinitionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_retry_on_non_retryable_step_is_rejected() {
        let fx = Fixture::new();
        let step: Step<BasicSession, InMemoryTx> =
            crate::step::RemoteStep::new("a", fx.endpoint("A")).into();
        let mut session = BasicSession::new(SessionId::new("Test-1"));
        let mut uow = UnitOfWork::new(Arc::new(fx.tx.clone()));

        let result = fx.orchestrator.retry_invocation(&mut session, &step, &mut uow);

        assert!(matches!(result, Err(SagaError::RetryOnNonRetryableStep(_))));
    }

    #[tokio::test]
    async fn test_failed_commit_persists_nothing() {
        let fx = Fixture::new();
        let failing: LocalEndpoint<BasicSession, InMemoryTx> = LocalEndpoint::new(
            "LocalSuccess",
            Arc::new(|s: &BasicSession| Message::new(s.id().clone(), "ok")),
            Arc::new(fx.commands.clone()),
            "LocalFailure",
            Arc::new(|s: &BasicSession| Message::new(s.id().clone(), "nok")),
            Arc::new(fx.commands.clone()),
            Arc::new(|_s: &BasicSession| {
                Ok(Executable::from_fn(|| {
                    Err(outbox::OutboxError::Backend("disk full".to_string()))
                }))
            }),
        );
        let saga = fx.saga(
            DefinitionBuilder::new()
                .step("a")
                .local_invoke(failing)
                .build()
                .unwrap(),
        );

        let result = fx.orchestrator.start_saga(&saga, SessionArgs::new()).await;

        assert!(matches!(result, Err(SagaError::Outbox(_))));
        assert!(fx.sessions.is_empty().await);
        assert_eq!(fx.commands.outbox_len().await, 0);
        assert_eq!(fx.tx.rolled_back(), 1);
    }
}

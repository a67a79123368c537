//! Saga error types.

use common::{ChannelName, SessionId};
use outbox::OutboxError;
use thiserror::Error;

use crate::state::SessionState;

/// Errors that can occur during saga registration, start and orchestration.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A saga was registered or started with an empty name.
    #[error("Saga name is empty")]
    EmptySagaName,

    /// A saga name contains the session id separator.
    #[error("Saga name '{0}' must not contain '-'")]
    InvalidSagaName(String),

    /// A saga with the same name is already registered.
    #[error("Saga '{0}' is already registered")]
    SagaAlreadyRegistered(String),

    /// No saga is registered under the requested name.
    #[error("Saga '{0}' not found")]
    SagaNotFound(String),

    /// The saga definition has no steps.
    #[error("Saga has no steps")]
    SagaHasNoSteps,

    /// A saga was started with invalid parameters.
    #[error("Start saga called with invalid parameters: {0}")]
    InvalidSagaStart(String),

    /// The session factory could not build a session from the arguments.
    #[error("Session creation failed: {0}")]
    SessionCreationFailed(String),

    /// The session factory produced a session without an id.
    #[error("Session ID is empty")]
    SessionIdEmpty,

    /// No session exists for the id carried by a response.
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// The session already reached a terminal state.
    #[error("Session {session_id} is already {state}")]
    DeadSession {
        session_id: SessionId,
        state: SessionState,
    },

    /// The session's current step is not part of the saga definition.
    #[error("Session step '{step}' is not part of the saga definition")]
    StepDefinitionMismatch { step: String },

    /// A response arrived through a channel the current step does not listen on.
    #[error("Message origin '{origin}' is unknown to step '{step}'")]
    UnknownMessageOrigin { origin: ChannelName, step: String },

    /// A retry was requested for a step that is not retry-until-complete.
    #[error("Retry called on step '{0}' which is not retry-until-complete")]
    RetryOnNonRetryableStep(String),

    /// A step could not produce its action.
    #[error("Saga step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    /// Outbox or unit-of-work error.
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true for errors raised by misconfiguration rather than by a
    /// running session.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SagaError::EmptySagaName
                | SagaError::InvalidSagaName(_)
                | SagaError::SagaAlreadyRegistered(_)
                | SagaError::SagaNotFound(_)
                | SagaError::SagaHasNoSteps
                | SagaError::InvalidSagaStart(_)
        )
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_classified() {
        assert!(SagaError::EmptySagaName.is_configuration_error());
        assert!(SagaError::SagaNotFound("X".to_string()).is_configuration_error());
        assert!(!SagaError::SessionNotFound(SessionId::new("X-1")).is_configuration_error());
        assert!(!SagaError::Outbox(OutboxError::UnitOfWorkImmutable).is_configuration_error());
    }

    #[test]
    fn test_dead_session_message_names_state() {
        let err = SagaError::DeadSession {
            session_id: SessionId::new("Order-1"),
            state: SessionState::Completed,
        };
        assert_eq!(err.to_string(), "Session Order-1 is already Completed");
    }
}

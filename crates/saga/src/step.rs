//! Saga steps.
//!
//! A step is either remote (its action is a command message for another
//! service) or local (its action runs in-process). Steps are immutable: the
//! `with_*` constructors return a new step and leave the receiver untouched.

use common::ChannelName;
use outbox::Executable;

use crate::endpoint::{Endpoint, LocalEndpoint};
use crate::error::{Result, SagaError};
use crate::session::Session;

/// A step whose actions are commands sent to a remote service.
pub struct RemoteStep<S, Tx: Send + 'static> {
    name: String,
    invocation: Option<Endpoint<S, Tx>>,
    compensation: Option<Endpoint<S, Tx>>,
    retry: bool,
}

impl<S: Session, Tx: Send + 'static> RemoteStep<S, Tx> {
    pub fn new(name: impl Into<String>, endpoint: Endpoint<S, Tx>) -> Self {
        Self {
            name: name.into(),
            invocation: Some(endpoint),
            compensation: None,
            retry: false,
        }
    }

    pub fn with_compensation(&self, endpoint: Endpoint<S, Tx>) -> Self {
        Self {
            compensation: Some(endpoint),
            ..self.clone()
        }
    }

    pub fn with_retry(&self) -> Self {
        Self {
            retry: true,
            ..self.clone()
        }
    }

    pub fn invocation(&self) -> Option<&Endpoint<S, Tx>> {
        self.invocation.as_ref()
    }

    pub fn compensation(&self) -> Option<&Endpoint<S, Tx>> {
        self.compensation.as_ref()
    }
}

impl<S, Tx: Send + 'static> Clone for RemoteStep<S, Tx> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            invocation: self.invocation.clone(),
            compensation: self.compensation.clone(),
            retry: self.retry,
        }
    }
}

/// A step whose actions run in-process through local endpoints.
pub struct LocalStep<S, Tx: Send + 'static> {
    name: String,
    invocation: Option<LocalEndpoint<S, Tx>>,
    compensation: Option<LocalEndpoint<S, Tx>>,
    retry: bool,
}

impl<S: Session, Tx: Send + 'static> LocalStep<S, Tx> {
    pub fn new(name: impl Into<String>, endpoint: LocalEndpoint<S, Tx>) -> Self {
        Self {
            name: name.into(),
            invocation: Some(endpoint),
            compensation: None,
            retry: false,
        }
    }

    pub fn with_compensation(&self, endpoint: LocalEndpoint<S, Tx>) -> Self {
        Self {
            compensation: Some(endpoint),
            ..self.clone()
        }
    }

    pub fn with_retry(&self) -> Self {
        Self {
            retry: true,
            ..self.clone()
        }
    }

    pub fn invocation(&self) -> Option<&LocalEndpoint<S, Tx>> {
        self.invocation.as_ref()
    }

    pub fn compensation(&self) -> Option<&LocalEndpoint<S, Tx>> {
        self.compensation.as_ref()
    }
}

impl<S, Tx: Send + 'static> Clone for LocalStep<S, Tx> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            invocation: self.invocation.clone(),
            compensation: self.compensation.clone(),
            retry: self.retry,
        }
    }
}

/// One step of a saga definition.
pub enum Step<S, Tx: Send + 'static> {
    Remote(RemoteStep<S, Tx>),
    Local(LocalStep<S, Tx>),
}

impl<S: Session, Tx: Send + 'static> Step<S, Tx> {
    /// A step with neither invocation nor compensation.
    ///
    /// Markers only give structure to a definition; the orchestrator walks
    /// past them in both directions.
    pub fn marker(name: impl Into<String>) -> Self {
        Step::Remote(RemoteStep {
            name: name.into(),
            invocation: None,
            compensation: None,
            retry: false,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Step::Remote(step) => &step.name,
            Step::Local(step) => &step.name,
        }
    }

    pub fn is_invocable(&self) -> bool {
        match self {
            Step::Remote(step) => step.invocation.is_some(),
            Step::Local(step) => step.invocation.is_some(),
        }
    }

    pub fn is_compensable(&self) -> bool {
        match self {
            Step::Remote(step) => step.compensation.is_some(),
            Step::Local(step) => step.compensation.is_some(),
        }
    }

    /// True if failures are retried in place instead of moving the session.
    pub fn must_be_completed(&self) -> bool {
        match self {
            Step::Remote(step) => step.retry,
            Step::Local(step) => step.retry,
        }
    }

    /// Success and failure response channels of the invocation endpoint.
    pub fn invocation_channels(&self) -> Option<(&ChannelName, &ChannelName)> {
        match self {
            Step::Remote(step) => step
                .invocation
                .as_ref()
                .map(|e| (e.success_channel(), e.failure_channel())),
            Step::Local(step) => step
                .invocation
                .as_ref()
                .map(|e| (e.success_channel(), e.failure_channel())),
        }
    }

    /// Success and failure response channels of the compensation endpoint.
    pub fn compensation_channels(&self) -> Option<(&ChannelName, &ChannelName)> {
        match self {
            Step::Remote(step) => step
                .compensation
                .as_ref()
                .map(|e| (e.success_channel(), e.failure_channel())),
            Step::Local(step) => step
                .compensation
                .as_ref()
                .map(|e| (e.success_channel(), e.failure_channel())),
        }
    }

    /// Produces the invocation action for the session.
    pub(crate) fn invoke(&self, session: &S) -> Result<Executable<Tx>> {
        let action = match self {
            Step::Remote(step) => step.invocation.as_ref().map(|e| e.send_command(session)),
            Step::Local(step) => step.invocation.as_ref().map(|e| e.handle(session)),
        };
        action.ok_or_else(|| SagaError::StepFailed {
            step: self.name().to_string(),
            reason: "step is not invocable".to_string(),
        })
    }

    /// Produces the compensation action for the session.
    pub(crate) fn compensate(&self, session: &S) -> Result<Executable<Tx>> {
        let action = match self {
            Step::Remote(step) => step.compensation.as_ref().map(|e| e.send_command(session)),
            Step::Local(step) => step.compensation.as_ref().map(|e| e.handle(session)),
        };
        action.ok_or_else(|| SagaError::StepFailed {
            step: self.name().to_string(),
            reason: "step is not compensable".to_string(),
        })
    }
}

impl<S, Tx: Send + 'static> Clone for Step<S, Tx> {
    fn clone(&self) -> Self {
        match self {
            Step::Remote(step) => Step::Remote(step.clone()),
            Step::Local(step) => Step::Local(step.clone()),
        }
    }
}

impl<S, Tx: Send + 'static> From<RemoteStep<S, Tx>> for Step<S, Tx> {
    fn from(step: RemoteStep<S, Tx>) -> Self {
        Step::Remote(step)
    }
}

impl<S, Tx: Send + 'static> From<LocalStep<S, Tx>> for Step<S, Tx> {
    fn from(step: LocalStep<S, Tx>) -> Self {
        Step::Local(step)
    }
}

impl<S, Tx: Send + 'static> std::fmt::Debug for Step<S, Tx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (kind, name, invocable, compensable, retry) = match self {
            Step::Remote(s) => (
                "Remote",
                &s.name,
                s.invocation.is_some(),
                s.compensation.is_some(),
                s.retry,
            ),
            Step::Local(s) => (
                "Local",
                &s.name,
                s.invocation.is_some(),
                s.compensation.is_some(),
                s.retry,
            ),
        };
        f.debug_struct(kind)
            .field("name", name)
            .field("invocable", &invocable)
            .field("compensable", &compensable)
            .field("retry", &retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::MessageConstructor;
    use crate::session::BasicSession;
    use outbox::{InMemoryMessageRepository, InMemoryTx, Message};
    use std::sync::Arc;

    type TestStep = Step<BasicSession, InMemoryTx>;

    fn constructor() -> MessageConstructor<BasicSession> {
        Arc::new(|session: &BasicSession| Message::new(session.id().clone(), "test"))
    }

    fn endpoint(prefix: &str) -> Endpoint<BasicSession, InMemoryTx> {
        Endpoint::new(
            format!("{prefix}Command"),
            constructor(),
            Arc::new(InMemoryMessageRepository::new()),
            format!("{prefix}Success"),
            constructor(),
            format!("{prefix}Failure"),
            constructor(),
        )
    }

    #[test]
    fn test_new_remote_step_is_invocable_only() {
        let step: TestStep = RemoteStep::new("reserve", endpoint("Inv")).into();

        assert_eq!(step.name(), "reserve");
        assert!(step.is_invocable());
        assert!(!step.is_compensable());
        assert!(!step.must_be_completed());
        assert!(step.compensation_channels().is_none());
    }

    #[test]
    fn test_builders_do_not_mutate_input() {
        let base = RemoteStep::new("reserve", endpoint("Inv"));
        let compensable = base.with_compensation(endpoint("Comp"));
        let retrying = compensable.with_retry();

        let base: TestStep = base.into();
        let compensable: TestStep = compensable.into();
        let retrying: TestStep = retrying.into();

        assert!(!base.is_compensable());
        assert!(!base.must_be_completed());
        assert!(compensable.is_compensable());
        assert!(!compensable.must_be_completed());
        assert!(retrying.is_compensable());
        assert!(retrying.must_be_completed());
    }

    #[test]
    fn test_channels_follow_endpoints() {
        let step: TestStep = RemoteStep::new("pay", endpoint("Pay"))
            .with_compensation(endpoint("Refund"))
            .into();

        let (success, failure) = step.invocation_channels().unwrap();
        assert_eq!(success.as_str(), "PaySuccess");
        assert_eq!(failure.as_str(), "PayFailure");

        let (success, failure) = step.compensation_channels().unwrap();
        assert_eq!(success.as_str(), "RefundSuccess");
        assert_eq!(failure.as_str(), "RefundFailure");
    }

    #[test]
    fn test_marker_has_no_actions() {
        let step = TestStep::marker("checkpoint");
        let session = BasicSession::new(common::SessionId::new("Saga-1"));

        assert!(!step.is_invocable());
        assert!(!step.is_compensable());
        assert!(matches!(step.invoke(&session), Err(SagaError::StepFailed { .. })));
        assert!(matches!(step.compensate(&session), Err(SagaError::StepFailed { .. })));
    }
}

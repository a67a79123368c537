//! Saga definitions and the fluent definition builder.

use crate::endpoint::{Endpoint, LocalEndpoint};
use crate::error::{Result, SagaError};
use crate::session::Session;
use crate::step::{LocalStep, RemoteStep, Step};

/// An ordered sequence of steps.
///
/// Lookups are linear scans by step name; step names are expected to be
/// unique within one definition.
pub struct Definition<S, Tx: Send + 'static> {
    steps: Vec<Step<S, Tx>>,
}

impl<S: Session, Tx: Send + 'static> Definition<S, Tx> {
    pub fn new(steps: Vec<Step<S, Tx>>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step<S, Tx>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn first_step(&self) -> Option<&Step<S, Tx>> {
        self.steps.first()
    }

    pub fn find_step(&self, name: &str) -> Option<&Step<S, Tx>> {
        self.steps.iter().find(|step| step.name() == name)
    }

    /// The step after `name`, or `None` at the end or if `name` is unknown.
    pub fn next_step(&self, name: &str) -> Option<&Step<S, Tx>> {
        let index = self.position(name)?;
        self.steps.get(index + 1)
    }

    /// The step before `name`, or `None` at the start or if `name` is unknown.
    pub fn prev_step(&self, name: &str) -> Option<&Step<S, Tx>> {
        let index = self.position(name)?;
        index.checked_sub(1).and_then(|i| self.steps.get(i))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.name() == name)
    }
}

impl<S, Tx: Send + 'static> Clone for Definition<S, Tx> {
    fn clone(&self) -> Self {
        Self {
            steps: self.steps.clone(),
        }
    }
}

impl<S, Tx: Send + 'static> std::fmt::Debug for Definition<S, Tx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.steps.iter()).finish()
    }
}

/// Builds a [`Definition`] step by step.
///
/// Every call consumes the builder and returns the next one, so a partially
/// built definition can never leak into another:
///
/// ```ignore
/// let definition = DefinitionBuilder::new()
///     .step("reserve_inventory")
///     .local_invoke(reserve)
///     .with_local_compensation(release)
///     .step("process_payment")
///     .invoke(charge)
///     .retry()
///     .build()?;
/// ```
pub struct DefinitionBuilder<S, Tx: Send + 'static> {
    steps: Vec<Step<S, Tx>>,
}

impl<S: Session, Tx: Send + 'static> DefinitionBuilder<S, Tx> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Starts a new step.
    pub fn step(self, name: impl Into<String>) -> StepNameBuilder<S, Tx> {
        StepNameBuilder {
            steps: self.steps,
            name: name.into(),
        }
    }

    /// Appends an already constructed step.
    pub fn add_step(mut self, step: impl Into<Step<S, Tx>>) -> Self {
        self.steps.push(step.into());
        self
    }

    /// Fails with [`SagaError::SagaHasNoSteps`] if no step was added.
    pub fn build(self) -> Result<Definition<S, Tx>> {
        if self.steps.is_empty() {
            return Err(SagaError::SagaHasNoSteps);
        }
        Ok(Definition::new(self.steps))
    }
}

impl<S: Session, Tx: Send + 'static> Default for DefinitionBuilder<S, Tx> {
    fn default() -> Self {
        Self::new()
    }
}

/// A named step waiting for its invocation.
pub struct StepNameBuilder<S, Tx: Send + 'static> {
    steps: Vec<Step<S, Tx>>,
    name: String,
}

impl<S: Session, Tx: Send + 'static> StepNameBuilder<S, Tx> {
    pub fn invoke(self, endpoint: Endpoint<S, Tx>) -> RemoteStepBuilder<S, Tx> {
        RemoteStepBuilder {
            steps: self.steps,
            current: RemoteStep::new(self.name, endpoint),
        }
    }

    pub fn local_invoke(self, endpoint: LocalEndpoint<S, Tx>) -> LocalStepBuilder<S, Tx> {
        LocalStepBuilder {
            steps: self.steps,
            current: LocalStep::new(self.name, endpoint),
        }
    }

    /// Finishes the step as a marker with no actions.
    pub fn marker(mut self) -> DefinitionBuilder<S, Tx> {
        self.steps.push(Step::marker(self.name));
        DefinitionBuilder { steps: self.steps }
    }
}

/// A remote step under construction.
pub struct RemoteStepBuilder<S, Tx: Send + 'static> {
    steps: Vec<Step<S, Tx>>,
    current: RemoteStep<S, Tx>,
}

impl<S: Session, Tx: Send + 'static> RemoteStepBuilder<S, Tx> {
    pub fn with_compensation(self, endpoint: Endpoint<S, Tx>) -> Self {
        Self {
            current: self.current.with_compensation(endpoint),
            steps: self.steps,
        }
    }

    pub fn retry(self) -> Self {
        Self {
            current: self.current.with_retry(),
            steps: self.steps,
        }
    }

    pub fn step(self, name: impl Into<String>) -> StepNameBuilder<S, Tx> {
        self.finish().step(name)
    }

    pub fn build(self) -> Result<Definition<S, Tx>> {
        self.finish().build()
    }

    fn finish(self) -> DefinitionBuilder<S, Tx> {
        DefinitionBuilder {
            steps: self.steps,
        }
        .add_step(self.current)
    }
}

/// A local step under construction.
pub struct LocalStepBuilder<S, Tx: Send + 'static> {
    steps: Vec<Step<S, Tx>>,
    current: LocalStep<S, Tx>,
}

impl<S: Session, Tx: Send + 'static> LocalStepBuilder<S, Tx> {
    pub fn with_local_compensation(self, endpoint: LocalEndpoint<S, Tx>) -> Self {
        Self {
            current: self.current.with_compensation(endpoint),
            steps: self.steps,
        }
    }

    pub fn retry(self) -> Self {
        Self {
            current: self.current.with_retry(),
            steps: self.steps,
        }
    }

    pub fn step(self, name: impl Into<String>) -> StepNameBuilder<S, Tx> {
        self.finish().step(name)
    }

    pub fn build(self) -> Result<Definition<S, Tx>> {
        self.finish().build()
    }

    fn finish(self) -> DefinitionBuilder<S, Tx> {
        DefinitionBuilder {
            steps: self.steps,
        }
        .add_step(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::MessageConstructor;
    use crate::session::BasicSession;
    use outbox::{Executable, InMemoryMessageRepository, InMemoryTx, Message};
    use std::sync::Arc;

    fn constructor() -> MessageConstructor<BasicSession> {
        Arc::new(|session: &BasicSession| Message::new(session.id().clone(), "test"))
    }

    fn remote() -> Endpoint<BasicSession, InMemoryTx> {
        Endpoint::new(
            "Command",
            constructor(),
            Arc::new(InMemoryMessageRepository::new()),
            "Success",
            constructor(),
            "Failure",
            constructor(),
        )
    }

    fn local() -> LocalEndpoint<BasicSession, InMemoryTx> {
        let repo = Arc::new(InMemoryMessageRepository::new());
        LocalEndpoint::new(
            "Success",
            constructor(),
            repo.clone(),
            "Failure",
            constructor(),
            repo,
            Arc::new(|_session: &BasicSession| Ok(Executable::noop())),
        )
    }

    fn names(definition: &Definition<BasicSession, InMemoryTx>) -> Vec<&str> {
        definition.steps().iter().map(|s| s.name()).collect()
    }

    #[test]
    fn test_builder_keeps_step_order_and_options() {
        let definition = DefinitionBuilder::new()
            .step("a")
            .invoke(remote())
            .with_compensation(remote())
            .step("b")
            .local_invoke(local())
            .retry()
            .step("c")
            .marker()
            .step("d")
            .local_invoke(local())
            .with_local_compensation(local())
            .build()
            .unwrap();

        assert_eq!(names(&definition), vec!["a", "b", "c", "d"]);

        let a = definition.find_step("a").unwrap();
        assert!(matches!(a, Step::Remote(_)));
        assert!(a.is_compensable());
        assert!(!a.must_be_completed());

        let b = definition.find_step("b").unwrap();
        assert!(matches!(b, Step::Local(_)));
        assert!(b.must_be_completed());
        assert!(!b.is_compensable());

        let c = definition.find_step("c").unwrap();
        assert!(!c.is_invocable());
        assert!(!c.is_compensable());

        assert!(definition.find_step("d").unwrap().is_compensable());
    }

    #[test]
    fn test_empty_builder_fails() {
        let result = DefinitionBuilder::<BasicSession, InMemoryTx>::new().build();
        assert!(matches!(result, Err(SagaError::SagaHasNoSteps)));
    }

    #[test]
    fn test_navigation_by_name() {
        let definition = DefinitionBuilder::new()
            .step("a")
            .invoke(remote())
            .step("b")
            .invoke(remote())
            .step("c")
            .invoke(remote())
            .build()
            .unwrap();

        assert_eq!(definition.first_step().unwrap().name(), "a");
        assert_eq!(definition.next_step("a").unwrap().name(), "b");
        assert_eq!(definition.next_step("b").unwrap().name(), "c");
        assert!(definition.next_step("c").is_none());
        assert_eq!(definition.prev_step("c").unwrap().name(), "b");
        assert!(definition.prev_step("a").is_none());
        assert!(definition.next_step("missing").is_none());
        assert!(definition.prev_step("missing").is_none());
        assert!(definition.exists("b"));
        assert!(!definition.exists("missing"));
    }

    #[test]
    fn test_empty_definition_has_no_first_step() {
        let definition: Definition<BasicSession, InMemoryTx> = Definition::new(Vec::new());
        assert!(definition.first_step().is_none());
        assert!(definition.is_empty());
    }
}

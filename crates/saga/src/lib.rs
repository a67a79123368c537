//! Saga orchestration.
//!
//! A saga is an ordered list of steps. Each step may invoke an action,
//! compensate it and be retried until it succeeds. The [`Orchestrator`]
//! starts sessions and reacts to every response by moving forward,
//! retrying or walking backward through compensations. All of it happens
//! inside one unit of work per response, and actions are only enqueued in
//! outboxes for the message relay to deliver.
//!
//! Responses are routed back by session id: a session of saga `Order` has
//! an id like `Order-<uuid>` and the [`Registry`] hands every response to the
//! sagas whose name matches that prefix.

pub mod channel;
pub mod definition;
pub mod endpoint;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod postgres;
pub mod registry;
pub mod saga;
pub mod session;
pub mod state;
pub mod step;

pub use channel::RegistryChannel;
pub use definition::{
    Definition, DefinitionBuilder, LocalStepBuilder, RemoteStepBuilder, StepNameBuilder,
};
pub use endpoint::{Endpoint, LocalEndpoint, LocalHandler, MessageConstructor};
pub use error::{Result, SagaError};
pub use memory::InMemorySessionRepository;
pub use orchestrator::Orchestrator;
pub use postgres::PostgresSessionRepository;
pub use registry::{RegisteredSaga, Registry, register_saga_to};
pub use saga::Saga;
pub use session::{BasicSession, Session, SessionArgs, SessionFactory, SessionRepository};
pub use state::SessionState;
pub use step::{LocalStep, RemoteStep, Step};

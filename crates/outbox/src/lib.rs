//! Transactional outbox primitives.
//!
//! Side effects are never performed directly. Repositories hand back
//! [`Executable`]s that a [`UnitOfWork`] runs inside one transaction, so a
//! state change and the messages it produces commit together or not at all.

pub mod channel;
pub mod error;
pub mod executable;
pub mod memory;
pub mod message;
pub mod postgres;
pub mod repository;
pub mod transaction;

pub use channel::Channel;
pub use common::{ChannelName, MessageId, SessionId};
pub use error::{OutboxError, Result};
pub use executable::{Executable, ExecutableFuture};
pub use memory::{InMemoryMessageRepository, InMemoryTx, InMemoryTxHandler};
pub use message::{Message, MessagePacket};
pub use postgres::{PgTx, PgTxHandler, PostgresMessageRepository, run_migrations};
pub use repository::MessageRepository;
pub use transaction::{TxHandler, UnitOfWork, UnitOfWorkFactory};

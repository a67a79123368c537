use common::ChannelName;
use outbox::OutboxError;
use thiserror::Error;

/// Errors raised by the relay and its channel registry.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Reading from or committing to an outbox failed.
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("Channel already registered: {0}")]
    ChannelAlreadyRegistered(ChannelName),

    #[error("Channel name cannot be empty")]
    EmptyChannelName,

    #[error("Batch size must be greater than zero")]
    InvalidBatchSize,

    /// A send task panicked or was cancelled.
    #[error("Send task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

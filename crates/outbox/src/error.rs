use common::ChannelName;
use thiserror::Error;

/// Errors raised by outbox storage, units of work and channels.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// A unit of work was modified or committed after a commit attempt.
    #[error("Unit of work is immutable because it has already been committed")]
    UnitOfWorkImmutable,

    /// A channel failed to deliver a message.
    #[error("Delivery through channel '{channel}' failed: {reason}")]
    Delivery {
        channel: ChannelName,
        reason: String,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A storage backend reported a failure that is not a database error.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl OutboxError {
    /// Builds a delivery error for the given channel.
    pub fn delivery(channel: &ChannelName, reason: impl std::fmt::Display) -> Self {
        Self::Delivery {
            channel: channel.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;

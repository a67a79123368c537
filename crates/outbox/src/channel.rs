use std::sync::Arc;

use async_trait::async_trait;
use common::ChannelName;

use crate::{Message, MessageRepository, Result};

/// The boundary between the outbox and whatever transport moves a message.
///
/// The relay reads pending messages from [`repository`](Self::repository)
/// and hands each one to [`send`](Self::send). A failed send moves the
/// message to the dead-letter store.
#[async_trait]
pub trait Channel<Tx: Send + 'static>: Send + Sync {
    fn name(&self) -> &ChannelName;

    /// Delivers one message. Errors are reported as [`OutboxError::Delivery`](crate::OutboxError::Delivery).
    async fn send(&self, message: Message) -> Result<()>;

    /// The repository holding this channel's outbox and dead letters.
    fn repository(&self) -> Arc<dyn MessageRepository<Tx>>;
}

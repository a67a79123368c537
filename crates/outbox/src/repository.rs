use async_trait::async_trait;

use crate::{Executable, Message, Result};

/// Storage contract for one channel's outbox and dead-letter store.
///
/// Reads happen immediately. Every mutation is returned as an [`Executable`]
/// so it runs inside the caller's unit of work and commits together with
/// the rest of the step.
#[async_trait]
pub trait MessageRepository<Tx: Send + 'static>: Send + Sync {
    /// Returns up to `batch_size` messages waiting in the outbox, oldest first.
    async fn get_messages_from_outbox(&self, batch_size: usize) -> Result<Vec<Message>>;

    /// Returns up to `batch_size` messages waiting in the dead-letter store, oldest first.
    async fn get_messages_from_dead_letter(&self, batch_size: usize) -> Result<Vec<Message>>;

    fn save_message(&self, message: Message) -> Executable<Tx>;

    fn save_dead_letter(&self, message: Message) -> Executable<Tx>;

    fn delete_message(&self, message: &Message) -> Executable<Tx>;

    fn delete_dead_letter(&self, message: &Message) -> Executable<Tx>;

    fn save_messages(&self, messages: Vec<Message>) -> Executable<Tx> {
        Executable::combine(
            messages
                .into_iter()
                .map(|message| self.save_message(message))
                .collect(),
        )
    }

    fn save_dead_letters(&self, messages: Vec<Message>) -> Executable<Tx> {
        Executable::combine(
            messages
                .into_iter()
                .map(|message| self.save_dead_letter(message))
                .collect(),
        )
    }

    fn delete_messages(&self, messages: &[Message]) -> Executable<Tx> {
        Executable::combine(
            messages
                .iter()
                .map(|message| self.delete_message(message))
                .collect(),
        )
    }

    fn delete_dead_letters(&self, messages: &[Message]) -> Executable<Tx> {
        Executable::combine(
            messages
                .iter()
                .map(|message| self.delete_dead_letter(message))
                .collect(),
        )
    }
}

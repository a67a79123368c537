//! Transport channels and the registry the relay drains them from.

use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::ChannelName;
use futures_util::future::BoxFuture;
use outbox::{Channel, Message, MessageRepository};

use crate::error::{RelayError, Result};

/// The transport behind a [`RelayChannel`].
pub type SendFn = Arc<dyn Fn(Message) -> BoxFuture<'static, outbox::Result<()>> + Send + Sync>;

/// A channel whose delivery is an injected async function.
///
/// Use it for command channels that leave the process: the function posts
/// the message to a queue, an HTTP endpoint or anything else.
pub struct RelayChannel<Tx: Send + 'static> {
    name: ChannelName,
    repository: Arc<dyn MessageRepository<Tx>>,
    send: SendFn,
}

impl<Tx: Send + 'static> RelayChannel<Tx> {
    pub fn new<F, Fut>(
        name: impl Into<ChannelName>,
        repository: Arc<dyn MessageRepository<Tx>>,
        send: F,
    ) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = outbox::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            repository,
            send: Arc::new(move |message| Box::pin(send(message))),
        }
    }
}

#[async_trait]
impl<Tx: Send + 'static> Channel<Tx> for RelayChannel<Tx> {
    fn name(&self) -> &ChannelName {
        &self.name
    }

    async fn send(&self, message: Message) -> outbox::Result<()> {
        (self.send)(message).await
    }

    fn repository(&self) -> Arc<dyn MessageRepository<Tx>> {
        Arc::clone(&self.repository)
    }
}

/// Channels known to a relay, kept in registration order.
pub struct ChannelRegistry<Tx: Send + 'static> {
    channels: RwLock<Vec<Arc<dyn Channel<Tx>>>>,
}

impl<Tx: Send + 'static> ChannelRegistry<Tx> {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(Vec::new()),
        }
    }

    /// Registers a channel under its own name. Names are unique.
    pub fn register(&self, channel: Arc<dyn Channel<Tx>>) -> Result<()> {
        let name = channel.name().clone();
        if name.is_empty() {
            return Err(RelayError::EmptyChannelName);
        }

        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if channels.iter().any(|c| c.name() == &name) {
            return Err(RelayError::ChannelAlreadyRegistered(name));
        }
        channels.push(channel);

        tracing::debug!(channel = %name, "channel registered");
        Ok(())
    }

    /// Wraps and registers a concrete channel.
    pub fn register_channel<C: Channel<Tx> + 'static>(&self, channel: C) -> Result<()> {
        self.register(Arc::new(channel))
    }

    pub fn find(&self, name: &ChannelName) -> Option<Arc<dyn Channel<Tx>>> {
        self.read().iter().find(|c| c.name() == name).cloned()
    }

    pub fn has(&self, name: &ChannelName) -> bool {
        self.read().iter().any(|c| c.name() == name)
    }

    /// A snapshot of every channel in registration order.
    pub fn channels(&self) -> Vec<Arc<dyn Channel<Tx>>> {
        self.read().clone()
    }

    pub fn names(&self) -> Vec<ChannelName> {
        self.read().iter().map(|c| c.name().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<dyn Channel<Tx>>>> {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<Tx: Send + 'static> Default for ChannelRegistry<Tx> {
    fn default() -> Self {
        Self::new()
    }
}

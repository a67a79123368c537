//! Endpoints: where a step sends its command and where its responses come from.

use std::sync::Arc;

use common::ChannelName;
use outbox::{Executable, Message, MessageRepository};

use crate::error::Result;
use crate::session::Session;

/// Builds a message from the session state at invocation time.
pub type MessageConstructor<S> = Arc<dyn Fn(&S) -> Message + Send + Sync>;

/// In-process action of a local endpoint.
///
/// `Ok` carries the side effect to commit with the step. `Err` means the
/// action failed and a failure response is produced instead.
pub type LocalHandler<S, Tx> = Arc<dyn Fn(&S) -> Result<Executable<Tx>> + Send + Sync>;

/// A remote endpoint.
///
/// Invoking it enqueues a command message in the command repository; the
/// relay later delivers it through the command channel. The remote side
/// answers on the success or failure response channel.
pub struct Endpoint<S, Tx: Send + 'static> {
    command_channel: ChannelName,
    command_constructor: MessageConstructor<S>,
    command_repository: Arc<dyn MessageRepository<Tx>>,
    success_channel: ChannelName,
    success_constructor: MessageConstructor<S>,
    failure_channel: ChannelName,
    failure_constructor: MessageConstructor<S>,
}

impl<S: Session, Tx: Send + 'static> Endpoint<S, Tx> {
    pub fn new(
        command_channel: impl Into<ChannelName>,
        command_constructor: MessageConstructor<S>,
        command_repository: Arc<dyn MessageRepository<Tx>>,
        success_channel: impl Into<ChannelName>,
        success_constructor: MessageConstructor<S>,
        failure_channel: impl Into<ChannelName>,
        failure_constructor: MessageConstructor<S>,
    ) -> Self {
        Self {
            command_channel: command_channel.into(),
            command_constructor,
            command_repository,
            success_channel: success_channel.into(),
            success_constructor,
            failure_channel: failure_channel.into(),
            failure_constructor,
        }
    }

    pub fn command_channel(&self) -> &ChannelName {
        &self.command_channel
    }

    pub fn command_repository(&self) -> Arc<dyn MessageRepository<Tx>> {
        Arc::clone(&self.command_repository)
    }

    pub fn success_channel(&self) -> &ChannelName {
        &self.success_channel
    }

    pub fn failure_channel(&self) -> &ChannelName {
        &self.failure_channel
    }

    /// Builds the command message for the session.
    pub fn command(&self, session: &S) -> Message {
        (self.command_constructor)(session)
    }

    /// Builds the message a remote service sends back on success.
    pub fn success_response(&self, session: &S) -> Message {
        (self.success_constructor)(session)
    }

    /// Builds the message a remote service sends back on failure.
    pub fn failure_response(&self, session: &S) -> Message {
        (self.failure_constructor)(session)
    }

    /// Enqueues the command for the session in the command outbox.
    pub(crate) fn send_command(&self, session: &S) -> Executable<Tx> {
        self.command_repository.save_message(self.command(session))
    }
}

impl<S, Tx: Send + 'static> Clone for Endpoint<S, Tx> {
    fn clone(&self) -> Self {
        Self {
            command_channel: self.command_channel.clone(),
            command_constructor: Arc::clone(&self.command_constructor),
            command_repository: Arc::clone(&self.command_repository),
            success_channel: self.success_channel.clone(),
            success_constructor: Arc::clone(&self.success_constructor),
            failure_channel: self.failure_channel.clone(),
            failure_constructor: Arc::clone(&self.failure_constructor),
        }
    }
}

/// An endpoint served in-process.
///
/// The handler runs while the step is being invoked. Its outcome is turned
/// into a response message written to the success or failure repository, so
/// local steps report back through the relay exactly like remote ones.
pub struct LocalEndpoint<S, Tx: Send + 'static> {
    success_channel: ChannelName,
    success_constructor: MessageConstructor<S>,
    success_repository: Arc<dyn MessageRepository<Tx>>,
    failure_channel: ChannelName,
    failure_constructor: MessageConstructor<S>,
    failure_repository: Arc<dyn MessageRepository<Tx>>,
    handler: LocalHandler<S, Tx>,
}

impl<S: Session, Tx: Send + 'static> LocalEndpoint<S, Tx> {
    pub fn new(
        success_channel: impl Into<ChannelName>,
        success_constructor: MessageConstructor<S>,
        success_repository: Arc<dyn MessageRepository<Tx>>,
        failure_channel: impl Into<ChannelName>,
        failure_constructor: MessageConstructor<S>,
        failure_repository: Arc<dyn MessageRepository<Tx>>,
        handler: LocalHandler<S, Tx>,
    ) -> Self {
        Self {
            success_channel: success_channel.into(),
            success_constructor,
            success_repository,
            failure_channel: failure_channel.into(),
            failure_constructor,
            failure_repository,
            handler,
        }
    }

    pub fn success_channel(&self) -> &ChannelName {
        &self.success_channel
    }

    pub fn failure_channel(&self) -> &ChannelName {
        &self.failure_channel
    }

    pub fn success_repository(&self) -> Arc<dyn MessageRepository<Tx>> {
        Arc::clone(&self.success_repository)
    }

    pub fn failure_repository(&self) -> Arc<dyn MessageRepository<Tx>> {
        Arc::clone(&self.failure_repository)
    }

    /// Runs the handler and returns its effect followed by the matching response.
    pub(crate) fn handle(&self, session: &S) -> Executable<Tx> {
        match (self.handler)(session) {
            Ok(effect) => {
                let response = (self.success_constructor)(session);
                effect.then(self.success_repository.save_message(response))
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session.id(),
                    error = %e,
                    "local handler failed, producing failure response"
                );
                let response = (self.failure_constructor)(session);
                self.failure_repository.save_message(response)
            }
        }
    }
}

impl<S, Tx: Send + 'static> Clone for LocalEndpoint<S, Tx> {
    fn clone(&self) -> Self {
        Self {
            success_channel: self.success_channel.clone(),
            success_constructor: Arc::clone(&self.success_constructor),
            success_repository: Arc::clone(&self.success_repository),
            failure_channel: self.failure_channel.clone(),
            failure_constructor: Arc::clone(&self.failure_constructor),
            failure_repository: Arc::clone(&self.failure_repository),
            handler: Arc::clone(&self.handler),
        }
    }
}

//! The relayer drains outboxes through their channels.

use std::sync::Arc;
use std::time::Instant;

use outbox::{Channel, Message, UnitOfWork, UnitOfWorkFactory};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::channel::ChannelRegistry;
use crate::error::{RelayError, Result};

/// Counts of what one relay batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySummary {
    /// Outbox messages delivered and removed.
    pub published: usize,
    /// Outbox messages whose delivery failed and were moved to the dead letters.
    pub dead_lettered: usize,
    /// Dead letters delivered on a later attempt and removed.
    pub replayed: usize,
}

impl RelaySummary {
    /// Total number of send attempts that produced a change.
    pub fn total(&self) -> usize {
        self.published + self.dead_lettered + self.replayed
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Which store a pass reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Outbox,
    DeadLetter,
}

/// Moves messages from outboxes to their channels.
///
/// Each call to [`execute`](Self::execute) spends at most `batch_size` send
/// attempts. Channels are visited in registration order; messages pulled
/// from one channel are sent concurrently. Outbox messages are drained
/// first, then the remaining budget replays dead letters. Every delete and
/// dead-letter write of one batch is committed in a single unit of work.
pub struct Relayer<Tx: Send + 'static> {
    batch_size: usize,
    channels: Arc<ChannelRegistry<Tx>>,
    uow_factory: UnitOfWorkFactory<Tx>,
    running: Mutex<()>,
}

impl<Tx: Send + 'static> Relayer<Tx> {
    pub fn new(
        batch_size: usize,
        channels: Arc<ChannelRegistry<Tx>>,
        uow_factory: UnitOfWorkFactory<Tx>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(RelayError::InvalidBatchSize);
        }

        Ok(Self {
            batch_size,
            channels,
            uow_factory,
            running: Mutex::new(()),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn channels(&self) -> &Arc<ChannelRegistry<Tx>> {
        &self.channels
    }

    /// Runs one relay batch.
    ///
    /// Concurrent calls wait for each other. A read or commit failure aborts
    /// the batch without removing anything from the outboxes.
    #[tracing::instrument(skip(self), fields(batch_size = self.batch_size))]
    pub async fn execute(&self) -> Result<RelaySummary> {
        let _running = self.running.lock().await;
        let started = Instant::now();

        let channels = self.channels.channels();
        let mut uow = self.uow_factory.create();
        let mut summary = RelaySummary::default();
        let mut remaining = self.batch_size;

        for source in [Source::Outbox, Source::DeadLetter] {
            for channel in &channels {
                if remaining == 0 {
                    break;
                }

                let outcomes = relay_channel(channel, source, remaining).await?;
                remaining = remaining.saturating_sub(outcomes.len());
                record(channel.as_ref(), source, outcomes, &mut uow, &mut summary)?;
            }
        }

        uow.commit().await?;

        metrics::counter!("relay_messages_published_total").increment(summary.published as u64);
        metrics::counter!("relay_messages_dead_lettered_total")
            .increment(summary.dead_lettered as u64);
        metrics::counter!("relay_dead_letters_replayed_total").increment(summary.replayed as u64);
        metrics::histogram!("relay_batch_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        if summary.is_empty() {
            tracing::trace!("relay batch found nothing to send");
        } else {
            tracing::info!(
                published = summary.published,
                dead_lettered = summary.dead_lettered,
                replayed = summary.replayed,
                "relay batch committed"
            );
        }

        Ok(summary)
    }
}

type Outcome = (Message, outbox::Result<()>);

/// Pulls up to `limit` messages of one channel and sends them concurrently.
///
/// Outcomes come back in the order the repository returned the messages.
async fn relay_channel<Tx: Send + 'static>(
    channel: &Arc<dyn Channel<Tx>>,
    source: Source,
    limit: usize,
) -> Result<Vec<Outcome>> {
    let repository = channel.repository();
    let messages = match source {
        Source::Outbox => repository.get_messages_from_outbox(limit).await?,
        Source::DeadLetter => repository.get_messages_from_dead_letter(limit).await?,
    };
    if messages.is_empty() {
        return Ok(Vec::new());
    }

    let mut tasks = JoinSet::new();
    for (index, message) in messages.into_iter().enumerate() {
        let channel = Arc::clone(channel);
        tasks.spawn(async move {
            let result = channel.send(message.clone()).await;
            (index, message, result)
        });
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined?);
    }
    outcomes.sort_by_key(|(index, _, _)| *index);

    Ok(outcomes
        .into_iter()
        .map(|(_, message, result)| (message, result))
        .collect())
}

/// Enqueues the repository writes for one channel's outcomes.
fn record<Tx: Send + 'static>(
    channel: &dyn Channel<Tx>,
    source: Source,
    outcomes: Vec<Outcome>,
    uow: &mut UnitOfWork<Tx>,
    summary: &mut RelaySummary,
) -> Result<()> {
    let repository = channel.repository();

    for (message, result) in outcomes {
        match (source, result) {
            (Source::Outbox, Ok(())) => {
                uow.add_work_unit(repository.delete_message(&message))?;
                summary.published += 1;
            }
            (Source::Outbox, Err(e)) => {
                tracing::warn!(
                    channel = %channel.name(),
                    message_id = %message.id,
                    session_id = %message.session_id,
                    error = %e,
                    "delivery failed, moving message to dead letters"
                );
                uow.add_work_unit(repository.delete_message(&message))?;
                uow.add_work_unit(repository.save_dead_letter(message))?;
                summary.dead_lettered += 1;
            }
            (Source::DeadLetter, Ok(())) => {
                uow.add_work_unit(repository.delete_dead_letter(&message))?;
                summary.replayed += 1;
            }
            (Source::DeadLetter, Err(e)) => {
                tracing::debug!(
                    channel = %channel.name(),
                    message_id = %message.id,
                    error = %e,
                    "dead letter replay failed"
                );
            }
        }
    }

    Ok(())
}

//! Fixed-interval batch runner.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::relayer::Relayer;

/// A unit of work that is repeated on a schedule.
#[async_trait]
pub trait BatchJob: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<()>;
}

#[async_trait]
impl<Tx: Send + 'static> BatchJob for Relayer<Tx> {
    fn name(&self) -> &str {
        "message-relay"
    }

    async fn run(&self) -> Result<()> {
        self.execute().await.map(|_| ())
    }
}

/// Handle to a running batch loop.
pub struct BatchRunHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl BatchRunHandle {
    /// Stops the loop and waits for the current run to finish.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::error!(error = %e, "batch loop ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Runs `job` now and then every `interval` until the handle is stopped.
///
/// A run that takes longer than `interval` delays the next one instead of
/// triggering a burst. Job errors are logged and the loop keeps going.
pub fn start_batch_run(interval: Duration, job: Arc<dyn BatchJob>) -> BatchRunHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        tracing::info!(job = job.name(), interval_ms = interval.as_millis() as u64, "starting batch run");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    if let Err(e) = job.run().await {
                        tracing::error!(job = job.name(), error = %e, "batch run failed");
                    }
                }
            }
        }

        tracing::info!(job = job.name(), "batch run stopped");
    });

    BatchRunHandle {
        shutdown: Some(shutdown_tx),
        task,
    }
}

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{Executable, OutboxError, Result};

/// Begins, commits and rolls back transactions of type `Tx`.
///
/// `Tx` is the context handed to every [`Executable`]. Implementations are
/// responsible for any timeouts; units of work wait on them unconditionally.
#[async_trait]
pub trait TxHandler<Tx: Send + 'static>: Send + Sync {
    /// Opens a new transaction.
    async fn begin_tx(&self) -> Result<Tx>;

    /// Commits a transaction.
    async fn commit(&self, tx: Tx) -> Result<()>;

    /// Rolls back a transaction.
    async fn rollback(&self, tx: Tx) -> Result<()>;
}

/// An atomic, commit-once batch of deferred operations.
///
/// Work units are queued with [`add_work_unit`](Self::add_work_unit) and run
/// in enqueue order inside a single transaction when [`commit`](Self::commit)
/// is called. The unit of work becomes immutable as soon as a commit is
/// attempted, whether or not it succeeds.
pub struct UnitOfWork<Tx: Send + 'static> {
    handler: Arc<dyn TxHandler<Tx>>,
    work_units: VecDeque<Executable<Tx>>,
    committed: bool,
}

impl<Tx: Send + 'static> UnitOfWork<Tx> {
    /// Creates an open unit of work bound to a transaction handler.
    pub fn new(handler: Arc<dyn TxHandler<Tx>>) -> Self {
        Self {
            handler,
            work_units: VecDeque::new(),
            committed: false,
        }
    }

    /// Queues an executable.
    ///
    /// Fails with [`OutboxError::UnitOfWorkImmutable`] once a commit was attempted.
    pub fn add_work_unit(&mut self, work_unit: Executable<Tx>) -> Result<()> {
        if self.committed {
            return Err(OutboxError::UnitOfWorkImmutable);
        }

        self.work_units.push_back(work_unit);
        Ok(())
    }

    /// Returns true once a commit has been attempted.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Number of queued executables that have not run.
    ///
    /// After a failed commit this is the number of work units behind the one
    /// that failed.
    pub fn pending_work_units(&self) -> usize {
        self.work_units.len()
    }

    /// Runs every queued executable inside one transaction.
    ///
    /// Stops at the first failing executable, rolls the transaction back and
    /// returns that error. Commits the transaction when all succeed.
    #[tracing::instrument(skip(self), fields(work_units = self.work_units.len()))]
    pub async fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Err(OutboxError::UnitOfWorkImmutable);
        }
        self.committed = true;

        let mut tx = self.handler.begin_tx().await?;

        while let Some(work_unit) = self.work_units.pop_front() {
            if let Err(e) = work_unit.execute(&mut tx).await {
                tracing::warn!(error = %e, remaining = self.work_units.len(), "work unit failed, rolling back");
                metrics::counter!("unit_of_work_rollbacks_total").increment(1);
                if let Err(rollback_err) = self.handler.rollback(tx).await {
                    tracing::error!(error = %rollback_err, "rollback failed");
                }
                return Err(e);
            }
        }

        self.handler.commit(tx).await?;
        metrics::counter!("unit_of_work_commits_total").increment(1);
        tracing::debug!("unit of work committed");

        Ok(())
    }
}

impl<Tx: Send + 'static> std::fmt::Debug for UnitOfWork<Tx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("work_units", &self.work_units.len())
            .field("committed", &self.committed)
            .finish()
    }
}

/// Produces a fresh [`UnitOfWork`] per saga step or relay tick.
pub struct UnitOfWorkFactory<Tx: Send + 'static> {
    handler: Arc<dyn TxHandler<Tx>>,
}

impl<Tx: Send + 'static> UnitOfWorkFactory<Tx> {
    pub fn new(handler: Arc<dyn TxHandler<Tx>>) -> Self {
        Self { handler }
    }

    /// Creates a new, open unit of work.
    pub fn create(&self) -> UnitOfWork<Tx> {
        UnitOfWork::new(Arc::clone(&self.handler))
    }
}

impl<Tx: Send + 'static> Clone for UnitOfWorkFactory<Tx> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

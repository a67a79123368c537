use futures_util::future::BoxFuture;

use crate::Result;

/// Future returned by an [`Executable`] body.
pub type ExecutableFuture<'a> = BoxFuture<'a, Result<()>>;

type ExecutableFn<Tx> = Box<dyn for<'a> FnOnce(&'a mut Tx) -> ExecutableFuture<'a> + Send>;

/// A deferred side effect that runs against a transaction context.
///
/// Repositories never write directly: they hand back an `Executable` that a
/// [`UnitOfWork`](crate::UnitOfWork) runs inside its transaction at commit
/// time. An executable runs at most once.
pub struct Executable<Tx> {
    run: ExecutableFn<Tx>,
}

impl<Tx: Send + 'static> Executable<Tx> {
    /// Wraps an async body that receives the transaction context.
    ///
    /// ```ignore
    /// Executable::new(move |tx| Box::pin(async move {
    ///     sqlx::query("DELETE FROM outbox_messages WHERE id = $1")
    ///         .bind(id)
    ///         .execute(&mut **tx)
    ///         .await?;
    ///     Ok(())
    /// }))
    /// ```
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut Tx) -> ExecutableFuture<'a> + Send + 'static,
    {
        Self { run: Box::new(f) }
    }

    /// Wraps a synchronous effect that does not touch the transaction context.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self::new(move |_tx| Box::pin(async move { f() }))
    }

    /// An executable that does nothing.
    pub fn noop() -> Self {
        Self::from_fn(|| Ok(()))
    }

    /// Chains several executables into one; they run in order and stop at
    /// the first failure.
    pub fn combine(executables: Vec<Executable<Tx>>) -> Self {
        Self::new(move |tx| {
            Box::pin(async move {
                for executable in executables {
                    executable.execute(tx).await?;
                }
                Ok(())
            })
        })
    }

    /// Runs `self` and then `next` if `self` succeeded.
    pub fn then(self, next: Executable<Tx>) -> Self {
        Self::combine(vec![self, next])
    }

    /// Runs the executable against the transaction context.
    pub async fn execute(self, tx: &mut Tx) -> Result<()> {
        (self.run)(tx).await
    }
}

impl<Tx> std::fmt::Debug for Executable<Tx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Executable")
    }
}

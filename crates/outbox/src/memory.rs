use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::RwLock;

use crate::{Executable, Message, MessageRepository, OutboxError, Result, TxHandler};

/// Transaction context for the in-memory backends.
///
/// Writes are staged on the transaction and only applied when the
/// [`InMemoryTxHandler`] commits it, so a rolled-back unit of work leaves
/// the stores untouched.
#[derive(Default)]
pub struct InMemoryTx {
    staged: Vec<BoxFuture<'static, ()>>,
}

impl InMemoryTx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a write to run when the transaction commits.
    pub fn stage<F>(&mut self, write: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.staged.push(Box::pin(write));
    }

    /// Number of writes waiting for commit.
    pub fn staged_writes(&self) -> usize {
        self.staged.len()
    }
}

/// Transaction handler for [`InMemoryTx`].
///
/// Counts begun, committed and rolled-back transactions and can be told to
/// fail on begin or commit for testing error paths.
#[derive(Clone, Default)]
pub struct InMemoryTxHandler {
    begun: Arc<AtomicUsize>,
    committed: Arc<AtomicUsize>,
    rolled_back: Arc<AtomicUsize>,
    fail_on_begin: Arc<AtomicBool>,
    fail_on_commit: Arc<AtomicBool>,
}

impl InMemoryTxHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begun(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn rolled_back(&self) -> usize {
        self.rolled_back.load(Ordering::SeqCst)
    }

    pub fn set_fail_on_begin(&self, fail: bool) {
        self.fail_on_begin.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_commit(&self, fail: bool) {
        self.fail_on_commit.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TxHandler<InMemoryTx> for InMemoryTxHandler {
    async fn begin_tx(&self) -> Result<InMemoryTx> {
        if self.fail_on_begin.load(Ordering::SeqCst) {
            return Err(OutboxError::Backend("begin failed".to_string()));
        }
        self.begun.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryTx::new())
    }

    async fn commit(&self, tx: InMemoryTx) -> Result<()> {
        if self.fail_on_commit.load(Ordering::SeqCst) {
            return Err(OutboxError::Backend("commit failed".to_string()));
        }

        for write in tx.staged {
            write.await;
        }
        self.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self, tx: InMemoryTx) -> Result<()> {
        drop(tx);
        self.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory message repository for testing and the demo server.
///
/// Keeps the outbox and the dead-letter store in insertion order. Reads and
/// writes can be made to fail on demand.
#[derive(Clone, Default)]
pub struct InMemoryMessageRepository {
    outbox: Arc<RwLock<Vec<Message>>>,
    dead_letters: Arc<RwLock<Vec<Message>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryMessageRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every message in the outbox.
    pub async fn outbox_messages(&self) -> Vec<Message> {
        self.outbox.read().await.clone()
    }

    /// Returns a copy of every message in the dead-letter store.
    pub async fn dead_letters(&self) -> Vec<Message> {
        self.dead_letters.read().await.clone()
    }

    pub async fn outbox_len(&self) -> usize {
        self.outbox.read().await.len()
    }

    pub async fn dead_letter_len(&self) -> usize {
        self.dead_letters.read().await.len()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(OutboxError::Backend("read failed".to_string()));
        }
        Ok(())
    }

    fn push(&self, store: &Arc<RwLock<Vec<Message>>>, message: Message) -> Executable<InMemoryTx> {
        let store = Arc::clone(store);
        let fail_writes = Arc::clone(&self.fail_writes);
        Executable::new(move |tx: &mut InMemoryTx| {
            Box::pin(async move {
                check_writes(&fail_writes)?;
                tx.stage(async move {
                    store.write().await.push(message);
                });
                Ok(())
            })
        })
    }

    fn remove(&self, store: &Arc<RwLock<Vec<Message>>>, message: &Message) -> Executable<InMemoryTx> {
        let store = Arc::clone(store);
        let fail_writes = Arc::clone(&self.fail_writes);
        let id = message.id;
        Executable::new(move |tx: &mut InMemoryTx| {
            Box::pin(async move {
                check_writes(&fail_writes)?;
                tx.stage(async move {
                    store.write().await.retain(|m| m.id != id);
                });
                Ok(())
            })
        })
    }
}

fn check_writes(fail_writes: &AtomicBool) -> Result<()> {
    if fail_writes.load(Ordering::SeqCst) {
        return Err(OutboxError::Backend("write failed".to_string()));
    }
    Ok(())
}

#[async_trait]
impl MessageRepository<InMemoryTx> for InMemoryMessageRepository {
    async fn get_messages_from_outbox(&self, batch_size: usize) -> Result<Vec<Message>> {
        self.check_reads()?;
        let outbox = self.outbox.read().await;
        Ok(outbox.iter().take(batch_size).cloned().collect())
    }

    async fn get_messages_from_dead_letter(&self, batch_size: usize) -> Result<Vec<Message>> {
        self.check_reads()?;
        let dead_letters = self.dead_letters.read().await;
        Ok(dead_letters.iter().take(batch_size).cloned().collect())
    }

    fn save_message(&self, message: Message) -> Executable<InMemoryTx> {
        self.push(&self.outbox, message)
    }

    fn save_dead_letter(&self, message: Message) -> Executable<InMemoryTx> {
        self.push(&self.dead_letters, message)
    }

    fn delete_message(&self, message: &Message) -> Executable<InMemoryTx> {
        self.remove(&self.outbox, message)
    }

    fn delete_dead_letter(&self, message: &Message) -> Executable<InMemoryTx> {
        self.remove(&self.dead_letters, message)
    }
}

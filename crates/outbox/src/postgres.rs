use async_trait::async_trait;
use common::{ChannelName, MessageId, SessionId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{Executable, Message, MessageRepository, Result, TxHandler};

/// Transaction context used by every PostgreSQL executable.
pub type PgTx = Transaction<'static, Postgres>;

/// Opens, commits and rolls back transactions on a PostgreSQL pool.
#[derive(Clone)]
pub struct PgTxHandler {
    pool: PgPool,
}

impl PgTxHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TxHandler<PgTx> for PgTxHandler {
    async fn begin_tx(&self) -> Result<PgTx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: PgTx) -> Result<()> {
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, tx: PgTx) -> Result<()> {
        tx.rollback().await?;
        Ok(())
    }
}

/// Runs the database migrations for the outbox and session tables.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// PostgreSQL-backed message repository scoped to one channel.
///
/// All channels share the `outbox_messages` and `dead_letter_messages`
/// tables; rows are partitioned by the `channel` column.
#[derive(Clone)]
pub struct PostgresMessageRepository {
    pool: PgPool,
    channel: ChannelName,
}

impl PostgresMessageRepository {
    pub fn new(pool: PgPool, channel: impl Into<ChannelName>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    fn row_to_message(row: PgRow) -> Result<Message> {
        Ok(Message {
            id: MessageId::from_uuid(row.try_get::<Uuid, _>("id")?),
            session_id: SessionId::new(row.try_get::<String, _>("session_id")?),
            trigger: row.try_get("trigger")?,
            created_at: row.try_get("created_at")?,
            payload: row.try_get("payload")?,
        })
    }

    async fn fetch(&self, table: &'static str, batch_size: usize) -> Result<Vec<Message>> {
        let limit = i64::try_from(batch_size).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            r#"
            SELECT id, session_id, trigger, created_at, payload
            FROM {table}
            WHERE channel = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#
        ))
        .bind(self.channel.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    fn insert(&self, table: &'static str, message: Message) -> Executable<PgTx> {
        let channel = self.channel.clone();
        Executable::new(move |tx: &mut PgTx| {
            Box::pin(async move {
                sqlx::query(&format!(
                    r#"
                    INSERT INTO {table} (id, channel, session_id, trigger, created_at, payload)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#
                ))
                .bind(message.id.as_uuid())
                .bind(channel.as_str())
                .bind(message.session_id.as_str())
                .bind(&message.trigger)
                .bind(message.created_at)
                .bind(&message.payload)
                .execute(&mut **tx)
                .await?;
                Ok(())
            })
        })
    }

    fn delete(&self, table: &'static str, message: &Message) -> Executable<PgTx> {
        let channel = self.channel.clone();
        let id = message.id.as_uuid();
        Executable::new(move |tx: &mut PgTx| {
            Box::pin(async move {
                sqlx::query(&format!("DELETE FROM {table} WHERE id = $1 AND channel = $2"))
                    .bind(id)
                    .bind(channel.as_str())
                    .execute(&mut **tx)
                    .await?;
                Ok(())
            })
        })
    }
}

const OUTBOX_TABLE: &str = "outbox_messages";
const DEAD_LETTER_TABLE: &str = "dead_letter_messages";

#[async_trait]
impl MessageRepository<PgTx> for PostgresMessageRepository {
    async fn get_messages_from_outbox(&self, batch_size: usize) -> Result<Vec<Message>> {
        self.fetch(OUTBOX_TABLE, batch_size).await
    }

    async fn get_messages_from_dead_letter(&self, batch_size: usize) -> Result<Vec<Message>> {
        self.fetch(DEAD_LETTER_TABLE, batch_size).await
    }

    fn save_message(&self, message: Message) -> Executable<PgTx> {
        self.insert(OUTBOX_TABLE, message)
    }

    fn save_dead_letter(&self, message: Message) -> Executable<PgTx> {
        self.insert(DEAD_LETTER_TABLE, message)
    }

    fn delete_message(&self, message: &Message) -> Executable<PgTx> {
        self.delete(OUTBOX_TABLE, message)
    }

    fn delete_dead_letter(&self, message: &Message) -> Executable<PgTx> {
        self.delete(DEAD_LETTER_TABLE, message)
    }
}

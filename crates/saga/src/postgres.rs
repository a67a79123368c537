use std::marker::PhantomData;

use async_trait::async_trait;
use common::SessionId;
use outbox::{Executable, PgTx};
use serde::{Serialize, de::DeserializeOwned};
use sqlx::{PgPool, Row};

use crate::session::{Session, SessionRepository};

/// PostgreSQL-backed session repository.
///
/// The whole session is stored as JSONB in `saga_sessions.data`. The
/// current step, pending flag and state are copied into their own columns
/// so sessions can be queried without decoding them.
pub struct PostgresSessionRepository<S> {
    pool: PgPool,
    _session: PhantomData<fn() -> S>,
}

impl<S> PostgresSessionRepository<S> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _session: PhantomData,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl<S> Clone for PostgresSessionRepository<S> {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}

impl<S: Session + DeserializeOwned> PostgresSessionRepository<S> {
    /// Loads every session of one saga, oldest update first.
    pub async fn load_by_saga(&self, saga_name: &str) -> outbox::Result<Vec<S>> {
        let rows = sqlx::query(
            r#"
            SELECT data
            FROM saga_sessions
            WHERE saga_name = $1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(saga_name)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> outbox::Result<S> {
                let data: serde_json::Value = row.try_get("data")?;
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }
}

#[async_trait]
impl<S> SessionRepository<S, PgTx> for PostgresSessionRepository<S>
where
    S: Session + Serialize + DeserializeOwned,
{
    async fn load(&self, id: &SessionId) -> outbox::Result<Option<S>> {
        let row = sqlx::query("SELECT data FROM saga_sessions WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let data: serde_json::Value = row.try_get("data")?;
                Ok(Some(serde_json::from_value(data)?))
            }
            None => Ok(None),
        }
    }

    fn save(&self, session: &S) -> Executable<PgTx> {
        let id = session.id().to_string();
        let saga_name = session.id().saga_name().to_string();
        let current_step = session.current_step().map(str::to_string);
        let pending = session.is_pending();
        let state = session.state().as_str();
        let data = serde_json::to_value(session);

        Executable::new(move |tx: &mut PgTx| {
            Box::pin(async move {
                let data = data?;
                sqlx::query(
                    r#"
                    INSERT INTO saga_sessions (id, saga_name, current_step, pending, state, data, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, NOW())
                    ON CONFLICT (id) DO UPDATE SET
                        current_step = EXCLUDED.current_step,
                        pending = EXCLUDED.pending,
                        state = EXCLUDED.state,
                        data = EXCLUDED.data,
                        updated_at = NOW()
                    "#,
                )
                .bind(id)
                .bind(saga_name)
                .bind(current_step)
                .bind(pending)
                .bind(state)
                .bind(data)
                .execute(&mut **tx)
                .await?;
                Ok(())
            })
        })
    }

    fn delete(&self, session: &S) -> Executable<PgTx> {
        let id = session.id().to_string();
        Executable::new(move |tx: &mut PgTx| {
            Box::pin(async move {
                sqlx::query("DELETE FROM saga_sessions WHERE id = $1")
                    .bind(id)
                    .execute(&mut **tx)
                    .await?;
                Ok(())
            })
        })
    }
}

//! Transactional producer: business state and outbox rows in one atomic unit.

use futures::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{NewOutboxMessage, OutboxMessage};
use crate::store::postgres_insert_outbox;

/// Appends outbox rows atomically with the caller's business writes.
///
/// The producer is deliberately thin: the guarantee is the *atomicity* of
/// business state and outbox row, not a clever API. Use
/// [`append`](Self::append) inside a transaction you already hold, or the
/// `execute_and_append*` pair to have the producer own the transaction.
///
/// # Example
///
/// ```ignore
/// use relaybox::{NewOutboxMessage, OutboxProducer};
///
/// let producer = OutboxProducer::new(pool);
/// let order_id = producer
///     .execute_and_append(
///         |tx| {
///             Box::pin(async move {
///                 let id: i64 = sqlx::query_scalar(
///                     "INSERT INTO orders (customer) VALUES ($1) RETURNING id",
///                 )
///                 .bind("acme")
///                 .fetch_one(&mut **tx)
///                 .await
///                 .map_err(relaybox::Error::from)?;
///                 Ok(id)
///             })
///         },
///         NewOutboxMessage::new(
///             "billing",
///             "order.created",
///             serde_json::json!({"customer": "acme"}),
///             "order",
///             "pending-id",
///         ),
///     )
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct OutboxProducer {
    pool: PgPool,
}

impl OutboxProducer {
    /// Create a producer over a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a `pending` outbox row inside the caller's open transaction.
    ///
    /// Does **not** open or commit anything itself: the row becomes
    /// durable exactly when the caller's transaction commits, and vanishes
    /// with it on rollback. `message_id` is generated (UUID v7) when the
    /// descriptor carries none.
    pub async fn append(
        tx: &mut Transaction<'_, Postgres>,
        message: NewOutboxMessage,
    ) -> Result<OutboxMessage> {
        let row = postgres_insert_outbox(&mut **tx, message).await?;
        debug!(
            message_id = %row.message_id,
            destination = %row.destination_service,
            event_type = %row.event_type,
            "Outbox row appended"
        );
        Ok(row)
    }

    /// Run `biz` and append one outbox row under a single transaction.
    ///
    /// Returns `biz`'s value. If `biz` fails or the append fails, the
    /// whole unit rolls back and the caller observes the original error.
    pub async fn execute_and_append<T, E, F>(
        &self,
        biz: F,
        message: NewOutboxMessage,
    ) -> std::result::Result<T, E>
    where
        E: From<Error>,
        F: for<'t> FnOnce(
            &'t mut Transaction<'static, Postgres>,
        ) -> BoxFuture<'t, std::result::Result<T, E>>,
    {
        self.execute_and_append_many(biz, vec![message]).await
    }

    /// Run `biz` and append N outbox rows under a single transaction.
    ///
    /// Any failure — in `biz` or in any append — rolls back all rows,
    /// including the business state.
    pub async fn execute_and_append_many<T, E, F>(
        &self,
        biz: F,
        messages: Vec<NewOutboxMessage>,
    ) -> std::result::Result<T, E>
    where
        E: From<Error>,
        F: for<'t> FnOnce(
            &'t mut Transaction<'static, Postgres>,
        ) -> BoxFuture<'t, std::result::Result<T, E>>,
    {
        let mut tx = self.pool.begin().await.map_err(Error::from)?;

        // Dropping `tx` on any early return rolls the whole unit back.
        let value = biz(&mut tx).await?;

        for message in messages {
            Self::append(&mut tx, message).await.map_err(E::from)?;
        }

        tx.commit().await.map_err(Error::from)?;
        Ok(value)
    }
}

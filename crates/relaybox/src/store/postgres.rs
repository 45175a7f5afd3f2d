//! PostgreSQL store implementation.

use std::collections::HashMap;
use std::time::Duration;

use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{AdmitOutcome, InboxClaim, InboxStore, OutboxStore};
use crate::error::{Error, Result};
use crate::message::{InboxMessage, NewInboxMessage, NewOutboxMessage, OutboxMessage};

const OUTBOX_COLUMNS: &str = "id, message_id, aggregate_type, aggregate_id, event_type, \
     destination_service, destination_topic, payload, headers, status, retry_count, \
     last_error, created_at, processes_at, published_at";

const INBOX_COLUMNS: &str = "id, message_id, aggregate_type, aggregate_id, event_type, \
     source_service, payload, headers, status, retry_count, last_error, received_at, \
     processes_at";

/// PostgreSQL-backed message store for production use.
///
/// Claims are a single `UPDATE … WHERE id = (SELECT … FOR UPDATE SKIP
/// LOCKED) RETURNING …` statement, so competing workers never block on each
/// other and never double-claim. All predicate timestamps (`now()`) are
/// computed in the database to avoid clock skew between app and DB servers.
///
/// # Database Schema
///
/// Requires the `outbox_messages` and `inbox_messages` tables created by
/// the migrations in `crates/relaybox/migrations`.
///
/// # Example
///
/// ```ignore
/// use relaybox::PgMessageStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://…").await?;
/// let store = PgMessageStore::new(pool);
/// ```
#[derive(Debug, Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    message_id: Uuid,
    aggregate_type: String,
    aggregate_id: String,
    event_type: String,
    destination_service: String,
    destination_topic: Option<String>,
    payload: serde_json::Value,
    headers: Option<Json<HashMap<String, String>>>,
    status: String,
    retry_count: i32,
    last_error: Option<String>,
    created_at: OffsetDateTime,
    processes_at: Option<OffsetDateTime>,
    published_at: Option<OffsetDateTime>,
}

impl TryFrom<OutboxRow> for OutboxMessage {
    type Error = Error;

    fn try_from(row: OutboxRow) -> Result<Self> {
        let status = row
            .status
            .parse()
            .map_err(|detail: String| Error::corrupt_row(row.id, detail))?;
        Ok(OutboxMessage {
            id: row.id,
            message_id: row.message_id,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            destination_service: row.destination_service,
            destination_topic: row.destination_topic,
            payload: row.payload,
            headers: row.headers.map(|h| h.0).unwrap_or_default(),
            status,
            retry_count: row.retry_count,
            last_error: row.last_error,
            created_at: row.created_at,
            processes_at: row.processes_at,
            published_at: row.published_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InboxRow {
    id: i64,
    message_id: Uuid,
    aggregate_type: String,
    aggregate_id: String,
    event_type: String,
    source_service: String,
    payload: serde_json::Value,
    headers: Option<Json<HashMap<String, String>>>,
    status: String,
    retry_count: i32,
    last_error: Option<String>,
    received_at: OffsetDateTime,
    processes_at: Option<OffsetDateTime>,
}

impl TryFrom<InboxRow> for InboxMessage {
    type Error = Error;

    fn try_from(row: InboxRow) -> Result<Self> {
        let status = row
            .status
            .parse()
            .map_err(|detail: String| Error::corrupt_row(row.id, detail))?;
        Ok(InboxMessage {
            id: row.id,
            message_id: row.message_id,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            source_service: row.source_service,
            payload: row.payload,
            headers: row.headers.map(|h| h.0).unwrap_or_default(),
            status,
            retry_count: row.retry_count,
            last_error: row.last_error,
            received_at: row.received_at,
            processes_at: row.processes_at,
        })
    }
}

impl PgMessageStore {
    /// Create a new PostgreSQL store from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Insert a pending outbox row through any executor (pool or the caller's
/// open transaction). Shared with the transactional producer.
pub(crate) async fn insert_outbox<'e, E>(
    executor: E,
    message: NewOutboxMessage,
) -> Result<OutboxMessage>
where
    E: sqlx::PgExecutor<'e>,
{
    let sql = format!(
        "INSERT INTO outbox_messages \
           (message_id, aggregate_type, aggregate_id, event_type, destination_service, \
            destination_topic, payload, headers, status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending') \
         RETURNING {OUTBOX_COLUMNS}"
    );
    let message_id = message.message_id_or_generate();
    let row: OutboxRow = sqlx::query_as(&sql)
        .bind(message_id)
        .bind(&message.aggregate_type)
        .bind(&message.aggregate_id)
        .bind(&message.event_type)
        .bind(&message.destination_service)
        .bind(&message.destination_topic)
        .bind(&message.payload)
        .bind(Json(&message.headers))
        .fetch_one(executor)
        .await?;
    row.try_into()
}

impl OutboxStore for PgMessageStore {
    async fn insert(&self, message: NewOutboxMessage) -> Result<OutboxMessage> {
        insert_outbox(&self.pool, message).await
    }

    async fn fetch_pending(
        &self,
        destination: Option<&str>,
        limit: u32,
        max_retries: u32,
    ) -> Result<Vec<OutboxMessage>> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_messages \
             WHERE status = 'pending' \
               AND retry_count < $1 \
               AND ($2::text IS NULL OR destination_service = $2) \
             ORDER BY created_at ASC, id ASC \
             LIMIT $3"
        );
        let rows: Vec<OutboxRow> = sqlx::query_as(&sql)
            .bind(max_retries as i32)
            .bind(destination)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn claim(&self, id: i64) -> Result<Option<OutboxMessage>> {
        let sql = format!(
            "UPDATE outbox_messages \
             SET status = 'processing', processes_at = now() \
             WHERE id = ( \
                 SELECT id FROM outbox_messages \
                 WHERE id = $1 AND status = 'pending' \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {OUTBOX_COLUMNS}"
        );
        let row: Option<OutboxRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn mark_published(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE outbox_messages \
             SET status = 'published', published_at = now() \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE outbox_messages \
             SET status = 'failed', retry_count = retry_count + 1, last_error = $2 \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fetch_failed(&self, limit: u32, max_retries: u32) -> Result<Vec<OutboxMessage>> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_messages \
             WHERE status = 'failed' AND retry_count < $1 \
             ORDER BY created_at ASC, id ASC \
             LIMIT $2"
        );
        let rows: Vec<OutboxRow> = sqlx::query_as(&sql)
            .bind(max_retries as i32)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn reset_failed(&self, id: i64) -> Result<bool> {
        let result =
            sqlx::query("UPDATE outbox_messages SET status = 'pending' WHERE id = $1 AND status = 'failed'")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_stuck(&self, stale_after: Duration) -> Result<u64> {
        // Cutoff computed in DB to avoid clock skew between app and DB servers.
        let result = sqlx::query(
            "UPDATE outbox_messages \
             SET status = 'pending' \
             WHERE status = 'processing' \
               AND processes_at < now() - ($1 * interval '1 second')",
        )
        .bind(stale_after.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_published_before(&self, cutoff: OffsetDateTime) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_messages WHERE status = 'published' AND published_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, message_id: Uuid) -> Result<Option<OutboxMessage>> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM outbox_messages WHERE message_id = $1");
        let row: Option<OutboxRow> = sqlx::query_as(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }
}

/// Inbox claim backed by an open transaction.
///
/// The `pending → processing` transition ran inside `tx` and is not yet
/// visible to anyone else; [`succeed`](InboxClaim::succeed) and
/// [`fail`](InboxClaim::fail) write the outcome and commit, so the claim
/// and the dispatch result land together. Dropping the claim rolls the
/// transaction back and releases the row lock.
pub struct PgInboxClaim {
    tx: Transaction<'static, Postgres>,
    message: InboxMessage,
}

impl InboxClaim for PgInboxClaim {
    fn message(&self) -> &InboxMessage {
        &self.message
    }

    async fn succeed(mut self) -> Result<()> {
        sqlx::query("UPDATE inbox_messages SET status = 'processed' WHERE id = $1")
            .bind(self.message.id)
            .execute(&mut *self.tx)
            .await?;
        self.tx.commit().await?;
        Ok(())
    }

    async fn fail(mut self, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE inbox_messages \
             SET status = 'failed', retry_count = retry_count + 1, last_error = $2 \
             WHERE id = $1",
        )
        .bind(self.message.id)
        .bind(error)
        .execute(&mut *self.tx)
        .await?;
        self.tx.commit().await?;
        Ok(())
    }
}

impl InboxStore for PgMessageStore {
    type Claim = PgInboxClaim;

    async fn admit(&self, message: NewInboxMessage) -> Result<AdmitOutcome> {
        // ON CONFLICT DO NOTHING makes the UNIQUE constraint the authority
        // on duplicates; no pre-check is involved in the race.
        let sql = format!(
            "INSERT INTO inbox_messages \
               (message_id, aggregate_type, aggregate_id, event_type, source_service, \
                payload, headers, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending') \
             ON CONFLICT (message_id) DO NOTHING \
             RETURNING {INBOX_COLUMNS}"
        );
        let row: Option<InboxRow> = sqlx::query_as(&sql)
            .bind(message.message_id)
            .bind(&message.aggregate_type)
            .bind(&message.aggregate_id)
            .bind(&message.event_type)
            .bind(&message.source_service)
            .bind(&message.payload)
            .bind(Json(&message.headers))
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(AdmitOutcome::Admitted(row.try_into()?)),
            None => Ok(AdmitOutcome::Duplicate),
        }
    }

    async fn fetch_pending(&self, limit: u32, max_retries: u32) -> Result<Vec<InboxMessage>> {
        let sql = format!(
            "SELECT {INBOX_COLUMNS} FROM inbox_messages \
             WHERE status = 'pending' AND retry_count < $1 \
             ORDER BY received_at ASC, id ASC \
             LIMIT $2"
        );
        let rows: Vec<InboxRow> = sqlx::query_as(&sql)
            .bind(max_retries as i32)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn claim(&self, id: i64) -> Result<Option<PgInboxClaim>> {
        self.claim_inbox(id, "pending").await
    }

    async fn claim_failed(&self, id: i64) -> Result<Option<PgInboxClaim>> {
        self.claim_inbox(id, "failed").await
    }

    async fn fetch_failed(&self, limit: u32, max_retries: u32) -> Result<Vec<InboxMessage>> {
        let sql = format!(
            "SELECT {INBOX_COLUMNS} FROM inbox_messages \
             WHERE status = 'failed' AND retry_count < $1 \
             ORDER BY received_at ASC, id ASC \
             LIMIT $2"
        );
        let rows: Vec<InboxRow> = sqlx::query_as(&sql)
            .bind(max_retries as i32)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn release_stuck(&self, stale_after: Duration) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE inbox_messages \
             SET status = 'pending' \
             WHERE status = 'processing' \
               AND processes_at < now() - ($1 * interval '1 second')",
        )
        .bind(stale_after.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_processed_before(&self, cutoff: OffsetDateTime) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM inbox_messages WHERE status = 'processed' AND processes_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, message_id: Uuid) -> Result<Option<InboxMessage>> {
        let sql = format!("SELECT {INBOX_COLUMNS} FROM inbox_messages WHERE message_id = $1");
        let row: Option<InboxRow> = sqlx::query_as(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }
}

impl PgMessageStore {
    /// Open a transaction and claim the row inside it. The transaction is
    /// handed to the claim and stays open until the outcome commits.
    async fn claim_inbox(&self, id: i64, from_status: &str) -> Result<Option<PgInboxClaim>> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "UPDATE inbox_messages \
             SET status = 'processing', processes_at = now() \
             WHERE id = ( \
                 SELECT id FROM inbox_messages \
                 WHERE id = $1 AND status = $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {INBOX_COLUMNS}"
        );
        let row: Option<InboxRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(from_status)
            .fetch_optional(&mut *tx)
            .await?;
        match row {
            Some(row) => Ok(Some(PgInboxClaim {
                tx,
                message: row.try_into()?,
            })),
            // Claim-miss: the dropped transaction rolls back and releases
            // nothing of consequence.
            None => Ok(None),
        }
    }
}

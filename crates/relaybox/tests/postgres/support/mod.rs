//! Shared fixtures for the Postgres integration tests.

use std::sync::Mutex;

use async_trait::async_trait;
use relaybox::{
    NewOutboxMessage, OutboxMessage, OutboxStatus, OutboxStore, PgMessageStore, Transport,
    TransportError,
};
use sqlx::PgPool;
use uuid::Uuid;

/// Transport stub that records successful publishes and can be switched
/// into a failing mode.
#[derive(Default)]
pub struct StubTransport {
    published: Mutex<Vec<Uuid>>,
    fail_with_status: Mutex<Option<u16>>,
}

impl StubTransport {
    pub fn failing(status: u16) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail_with_status: Mutex::new(Some(status)),
        }
    }

    pub fn heal(&self) {
        *self.fail_with_status.lock().unwrap() = None;
    }

    pub fn published(&self) -> Vec<Uuid> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), TransportError> {
        assert_eq!(
            message.status,
            OutboxStatus::Processing,
            "transport invoked for an unclaimed row"
        );
        if let Some(status) = *self.fail_with_status.lock().unwrap() {
            return Err(TransportError::Status { status });
        }
        self.published.lock().unwrap().push(message.message_id);
        Ok(())
    }
}

/// Insert one pending outbox row for `destination`.
pub async fn seed_event(
    store: &PgMessageStore,
    destination: &str,
) -> anyhow::Result<OutboxMessage> {
    let row = store
        .insert(NewOutboxMessage::new(
            destination,
            "order.created",
            serde_json::json!({"k": 1}),
            "order",
            "o-1",
        ))
        .await?;
    Ok(row)
}

/// Raw status of an outbox row, straight from the table.
pub async fn outbox_status(pool: &PgPool, id: i64) -> anyhow::Result<String> {
    let status: String = sqlx::query_scalar("SELECT status FROM outbox_messages WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(status)
}

/// Raw status of an inbox row.
pub async fn inbox_status(pool: &PgPool, id: i64) -> anyhow::Result<String> {
    let status: String = sqlx::query_scalar("SELECT status FROM inbox_messages WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(status)
}

/// Age an outbox row's claim timestamp, simulating a worker that died
/// mid-processing.
pub async fn age_outbox_claim(pool: &PgPool, id: i64) -> anyhow::Result<()> {
    sqlx::query("UPDATE outbox_messages SET processes_at = now() - interval '1 hour' WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Age an outbox row's publication timestamp, for retention tests.
pub async fn age_outbox_publication(pool: &PgPool, id: i64, days: i32) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE outbox_messages \
         SET published_at = now() - ($2 * interval '1 day'), \
             created_at = now() - ($2 * interval '1 day') \
         WHERE id = $1",
    )
    .bind(id)
    .bind(days)
    .execute(pool)
    .await?;
    Ok(())
}

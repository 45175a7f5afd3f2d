//! In-memory store implementation.
//!
//! Implements the same contract as the PostgreSQL backend — claim-miss
//! semantics, idempotent admission, status-guarded transitions — behind a
//! single mutex, so claims are serialized by construction rather than by
//! `FOR UPDATE SKIP LOCKED`. Intended for tests and examples; the
//! relational store remains the source of truth in production.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AdmitOutcome, InboxClaim, InboxStore, OutboxStore};
use crate::error::Result;
use crate::message::{
    InboxMessage, InboxStatus, NewInboxMessage, NewOutboxMessage, OutboxMessage, OutboxStatus,
};

#[derive(Default)]
struct MemoryInner {
    next_outbox_id: i64,
    next_inbox_id: i64,
    outbox: Vec<OutboxMessage>,
    inbox: Vec<InboxMessage>,
}

/// In-memory message store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot one outbox row by local id, for assertions.
    pub async fn outbox_row(&self, id: i64) -> Option<OutboxMessage> {
        let inner = self.inner.lock().await;
        inner.outbox.iter().find(|m| m.id == id).cloned()
    }

    /// Snapshot one inbox row by local id, for assertions.
    pub async fn inbox_row(&self, id: i64) -> Option<InboxMessage> {
        let inner = self.inner.lock().await;
        inner.inbox.iter().find(|m| m.id == id).cloned()
    }

    /// Number of outbox rows, regardless of status.
    pub async fn outbox_len(&self) -> usize {
        self.inner.lock().await.outbox.len()
    }

    /// Number of inbox rows, regardless of status.
    pub async fn inbox_len(&self) -> usize {
        self.inner.lock().await.inbox.len()
    }
}

impl OutboxStore for MemoryStore {
    async fn insert(&self, message: NewOutboxMessage) -> Result<OutboxMessage> {
        let mut inner = self.inner.lock().await;
        inner.next_outbox_id += 1;
        let row = OutboxMessage {
            id: inner.next_outbox_id,
            message_id: message.message_id_or_generate(),
            aggregate_type: message.aggregate_type,
            aggregate_id: message.aggregate_id,
            event_type: message.event_type,
            destination_service: message.destination_service,
            destination_topic: message.destination_topic,
            payload: message.payload,
            headers: message.headers,
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: OffsetDateTime::now_utc(),
            processes_at: None,
            published_at: None,
        };
        inner.outbox.push(row.clone());
        Ok(row)
    }

    async fn fetch_pending(
        &self,
        destination: Option<&str>,
        limit: u32,
        max_retries: u32,
    ) -> Result<Vec<OutboxMessage>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<OutboxMessage> = inner
            .outbox
            .iter()
            .filter(|m| m.status == OutboxStatus::Pending)
            .filter(|m| m.retry_count < max_retries as i32)
            .filter(|m| destination.is_none_or(|d| m.destination_service == d))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn claim(&self, id: i64) -> Result<Option<OutboxMessage>> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner
            .outbox
            .iter_mut()
            .find(|m| m.id == id && m.status == OutboxStatus::Pending)
        else {
            return Ok(None);
        };
        row.status = OutboxStatus::Processing;
        row.processes_at = Some(OffsetDateTime::now_utc());
        Ok(Some(row.clone()))
    }

    async fn mark_published(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner
            .outbox
            .iter_mut()
            .find(|m| m.id == id && m.status == OutboxStatus::Processing)
        else {
            return Ok(false);
        };
        row.status = OutboxStatus::Published;
        row.published_at = Some(OffsetDateTime::now_utc());
        Ok(true)
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner
            .outbox
            .iter_mut()
            .find(|m| m.id == id && m.status == OutboxStatus::Processing)
        else {
            return Ok(false);
        };
        row.status = OutboxStatus::Failed;
        row.retry_count += 1;
        row.last_error = Some(error.to_string());
        Ok(true)
    }

    async fn fetch_failed(&self, limit: u32, max_retries: u32) -> Result<Vec<OutboxMessage>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<OutboxMessage> = inner
            .outbox
            .iter()
            .filter(|m| m.status == OutboxStatus::Failed)
            .filter(|m| m.retry_count < max_retries as i32)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn reset_failed(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner
            .outbox
            .iter_mut()
            .find(|m| m.id == id && m.status == OutboxStatus::Failed)
        else {
            return Ok(false);
        };
        row.status = OutboxStatus::Pending;
        Ok(true)
    }

    async fn release_stuck(&self, stale_after: Duration) -> Result<u64> {
        let cutoff = OffsetDateTime::now_utc() - stale_after;
        let mut inner = self.inner.lock().await;
        let mut released = 0;
        for row in inner.outbox.iter_mut() {
            if row.status == OutboxStatus::Processing
                && row.processes_at.is_some_and(|at| at < cutoff)
            {
                row.status = OutboxStatus::Pending;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn delete_published_before(&self, cutoff: OffsetDateTime) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.outbox.len();
        inner.outbox.retain(|m| {
            !(m.status == OutboxStatus::Published
                && m.published_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - inner.outbox.len()) as u64)
    }

    async fn get(&self, message_id: Uuid) -> Result<Option<OutboxMessage>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .outbox
            .iter()
            .find(|m| m.message_id == message_id)
            .cloned())
    }
}

/// Inbox claim for the in-memory backend.
///
/// There is no transaction to hold open; the claim already moved the row
/// to `processing` under the store mutex, and settling applies the
/// outcome under the same mutex. An unsettled claim leaves the row
/// `processing` until the visibility timeout recovers it, like a crashed
/// worker would.
pub struct MemoryInboxClaim {
    inner: Arc<Mutex<MemoryInner>>,
    message: InboxMessage,
}

impl InboxClaim for MemoryInboxClaim {
    fn message(&self) -> &InboxMessage {
        &self.message
    }

    async fn succeed(self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(row) = inner
            .inbox
            .iter_mut()
            .find(|m| m.id == self.message.id && m.status == InboxStatus::Processing)
        {
            row.status = InboxStatus::Processed;
        }
        Ok(())
    }

    async fn fail(self, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(row) = inner
            .inbox
            .iter_mut()
            .find(|m| m.id == self.message.id && m.status == InboxStatus::Processing)
        {
            row.status = InboxStatus::Failed;
            row.retry_count += 1;
            row.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

impl InboxStore for MemoryStore {
    type Claim = MemoryInboxClaim;

    async fn admit(&self, message: NewInboxMessage) -> Result<AdmitOutcome> {
        let mut inner = self.inner.lock().await;
        if inner
            .inbox
            .iter()
            .any(|m| m.message_id == message.message_id)
        {
            return Ok(AdmitOutcome::Duplicate);
        }
        inner.next_inbox_id += 1;
        let row = InboxMessage {
            id: inner.next_inbox_id,
            message_id: message.message_id,
            aggregate_type: message.aggregate_type,
            aggregate_id: message.aggregate_id,
            event_type: message.event_type,
            source_service: message.source_service,
            payload: message.payload,
            headers: message.headers,
            status: InboxStatus::Pending,
            retry_count: 0,
            last_error: None,
            received_at: OffsetDateTime::now_utc(),
            processes_at: None,
        };
        inner.inbox.push(row.clone());
        Ok(AdmitOutcome::Admitted(row))
    }

    async fn fetch_pending(&self, limit: u32, max_retries: u32) -> Result<Vec<InboxMessage>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<InboxMessage> = inner
            .inbox
            .iter()
            .filter(|m| m.status == InboxStatus::Pending)
            .filter(|m| m.retry_count < max_retries as i32)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn claim(&self, id: i64) -> Result<Option<MemoryInboxClaim>> {
        self.claim_with_status(id, InboxStatus::Pending).await
    }

    async fn claim_failed(&self, id: i64) -> Result<Option<MemoryInboxClaim>> {
        self.claim_with_status(id, InboxStatus::Failed).await
    }

    async fn fetch_failed(&self, limit: u32, max_retries: u32) -> Result<Vec<InboxMessage>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<InboxMessage> = inner
            .inbox
            .iter()
            .filter(|m| m.status == InboxStatus::Failed)
            .filter(|m| m.retry_count < max_retries as i32)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn release_stuck(&self, stale_after: Duration) -> Result<u64> {
        let cutoff = OffsetDateTime::now_utc() - stale_after;
        let mut inner = self.inner.lock().await;
        let mut released = 0;
        for row in inner.inbox.iter_mut() {
            if row.status == InboxStatus::Processing
                && row.processes_at.is_some_and(|at| at < cutoff)
            {
                row.status = InboxStatus::Pending;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn delete_processed_before(&self, cutoff: OffsetDateTime) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.inbox.len();
        inner.inbox.retain(|m| {
            !(m.status == InboxStatus::Processed
                && m.processes_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - inner.inbox.len()) as u64)
    }

    async fn get(&self, message_id: Uuid) -> Result<Option<InboxMessage>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .inbox
            .iter()
            .find(|m| m.message_id == message_id)
            .cloned())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Shift an outbox row's timestamps into the past, for retention and
    /// visibility-timeout tests.
    pub(crate) async fn backdate_outbox(&self, id: i64, by: Duration) {
        let mut inner = self.inner.lock().await;
        if let Some(row) = inner.outbox.iter_mut().find(|m| m.id == id) {
            row.created_at = row.created_at - by;
            row.processes_at = row.processes_at.map(|t| t - by);
            row.published_at = row.published_at.map(|t| t - by);
        }
    }

    /// Shift an inbox row's timestamps into the past.
    pub(crate) async fn backdate_inbox(&self, id: i64, by: Duration) {
        let mut inner = self.inner.lock().await;
        if let Some(row) = inner.inbox.iter_mut().find(|m| m.id == id) {
            row.received_at = row.received_at - by;
            row.processes_at = row.processes_at.map(|t| t - by);
        }
    }
}

impl MemoryStore {
    async fn claim_with_status(
        &self,
        id: i64,
        expected: InboxStatus,
    ) -> Result<Option<MemoryInboxClaim>> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner
            .inbox
            .iter_mut()
            .find(|m| m.id == id && m.status == expected)
        else {
            return Ok(None);
        };
        row.status = InboxStatus::Processing;
        row.processes_at = Some(OffsetDateTime::now_utc());
        let message = row.clone();
        drop(inner);
        Ok(Some(MemoryInboxClaim {
            inner: Arc::clone(&self.inner),
            message,
        }))
    }
}

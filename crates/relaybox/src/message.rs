//! Outbox and inbox message rows and their status machines.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle of an outbox row.
///
/// ```text
/// pending ──claim──▶ processing ──publish ok──▶ published
///    ▲                   │
///    │                   └──publish err──▶ failed (retry_count + 1)
///    └────────retry_failed / visibility timeout────────┘
/// ```
///
/// `published` is terminal. `failed` returns to `pending` only via an
/// explicit retry operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

impl OutboxStatus {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processing" => Ok(OutboxStatus::Processing),
            "published" => Ok(OutboxStatus::Published),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an inbox row. Mirror of [`OutboxStatus`] with `processed`
/// as the terminal success state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl InboxStatus {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxStatus::Pending => "pending",
            InboxStatus::Processing => "processing",
            InboxStatus::Processed => "processed",
            InboxStatus::Failed => "failed",
        }
    }
}

impl FromStr for InboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InboxStatus::Pending),
            "processing" => Ok(InboxStatus::Processing),
            "processed" => Ok(InboxStatus::Processed),
            "failed" => Ok(InboxStatus::Failed),
            other => Err(format!("unknown inbox status: {other}")),
        }
    }
}

impl fmt::Display for InboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted outbound event, owned by the message store.
///
/// `payload` and `headers` are immutable after creation; workers only ever
/// mutate `status`, `retry_count`, `last_error` and the claim/publish
/// timestamps, and only through store transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Monotone local key; primary ordering for cleanup.
    pub id: i64,
    /// Externally visible identifier (UUID v7, lexical order tracks creation).
    pub message_id: Uuid,
    /// Domain correlation: entity kind.
    pub aggregate_type: String,
    /// Domain correlation: entity id.
    pub aggregate_id: String,
    /// Semantic name of the event.
    pub event_type: String,
    /// Logical target, resolved by the transport to an endpoint.
    pub destination_service: String,
    /// Optional sub-path/topic override.
    pub destination_topic: Option<String>,
    /// Opaque structured body.
    pub payload: Value,
    /// Opaque string-to-string metadata, merged into transport headers.
    pub headers: HashMap<String, String>,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: OffsetDateTime,
    /// Timestamp of the most recent claim.
    pub processes_at: Option<OffsetDateTime>,
    pub published_at: Option<OffsetDateTime>,
}

/// A persisted inbound event. `message_id` is UNIQUE per table — the
/// idempotency key for admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: i64,
    pub message_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    /// Logical name of the sending service.
    pub source_service: String,
    pub payload: Value,
    pub headers: HashMap<String, String>,
    pub status: InboxStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub received_at: OffsetDateTime,
    pub processes_at: Option<OffsetDateTime>,
}

/// Descriptor for a new outbox row, before persistence.
///
/// Construct with [`NewOutboxMessage::new`] and chain the optional fields.
/// `message_id` is generated (UUID v7) when not supplied.
///
/// # Example
///
/// ```
/// use relaybox::NewOutboxMessage;
///
/// let event = NewOutboxMessage::new(
///     "billing",
///     "invoice.created",
///     serde_json::json!({"invoice_id": 42}),
///     "invoice",
///     "42",
/// )
/// .topic("invoices")
/// .header("x-tenant", "acme");
///
/// assert_eq!(event.destination_service, "billing");
/// assert_eq!(event.destination_topic.as_deref(), Some("invoices"));
/// ```
#[derive(Debug, Clone)]
pub struct NewOutboxMessage {
    pub message_id: Option<Uuid>,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub destination_service: String,
    pub destination_topic: Option<String>,
    pub payload: Value,
    pub headers: HashMap<String, String>,
}

impl NewOutboxMessage {
    /// Create a descriptor with the required fields.
    pub fn new(
        destination_service: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
    ) -> Self {
        Self {
            message_id: None,
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            destination_service: destination_service.into(),
            destination_topic: None,
            payload,
            headers: HashMap::new(),
        }
    }

    /// Use an explicit message id instead of generating one.
    pub fn message_id(mut self, id: Uuid) -> Self {
        self.message_id = Some(id);
        self
    }

    /// Set the destination topic override.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.destination_topic = Some(topic.into());
        self
    }

    /// Add one metadata header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replace the full header map.
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// The message id to persist, generating a UUID v7 when absent.
    pub(crate) fn message_id_or_generate(&self) -> Uuid {
        self.message_id.unwrap_or_else(Uuid::now_v7)
    }
}

/// Descriptor for a new inbox row, built by an ingress adapter.
#[derive(Debug, Clone)]
pub struct NewInboxMessage {
    pub message_id: Uuid,
    pub source_service: String,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: Value,
    pub headers: HashMap<String, String>,
}

impl NewInboxMessage {
    /// Create a descriptor with the required identity fields.
    pub fn new(
        message_id: Uuid,
        source_service: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            message_id,
            source_service: source_service.into(),
            event_type: event_type.into(),
            aggregate_type: String::new(),
            aggregate_id: String::new(),
            payload,
            headers: HashMap::new(),
        }
    }

    /// Set the aggregate correlation key.
    pub fn aggregate(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.aggregate_type = kind.into();
        self.aggregate_id = id.into();
        self
    }

    /// Replace the full header map.
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Processing,
            OutboxStatus::Published,
            OutboxStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
        for status in [
            InboxStatus::Pending,
            InboxStatus::Processing,
            InboxStatus::Processed,
            InboxStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<InboxStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("archived".parse::<OutboxStatus>().is_err());
        assert!("archived".parse::<InboxStatus>().is_err());
    }

    #[test]
    fn generated_message_ids_are_time_ordered() {
        let a = NewOutboxMessage::new("svc", "e", serde_json::json!({}), "t", "1")
            .message_id_or_generate();
        let b = NewOutboxMessage::new("svc", "e", serde_json::json!({}), "t", "1")
            .message_id_or_generate();
        // UUID v7 embeds a millisecond timestamp; later ids never sort below
        // earlier ones.
        assert!(a <= b);
    }

    #[test]
    fn explicit_message_id_is_kept() {
        let id = Uuid::now_v7();
        let new = NewOutboxMessage::new("svc", "e", serde_json::json!({}), "t", "1").message_id(id);
        assert_eq!(new.message_id_or_generate(), id);
    }
}

//! Transactional outbox/inbox toolkit for reliable service-to-service events.
//!
//! Relaybox lets a service atomically persist a domain state change together
//! with the intent to notify other services, then deliver those
//! notifications reliably — and symmetrically absorb inbound notifications
//! with idempotent admission and handler dispatch. The relational store is
//! the sole source of truth; there is no in-memory queueing.
//!
//! # Architecture
//!
//! ```text
//! produce:  caller ──▶ OutboxProducer (inside the caller's transaction) ──▶ outbox table
//!           later:  OutboxRelay ──claim──▶ Transport ──▶ record outcome
//!
//! consume:  ingress ──▶ InboxAdmitter (idempotent on message_id) ──▶ inbox table
//!           later:  InboxDispatcher ──claim──▶ EventHandler (via HandlerRegistry) ──▶ record outcome
//! ```
//!
//! Both workers drive rows through a `pending → processing →
//! published/processed | failed` lifecycle with bounded retries. Per-row
//! exclusivity across competing workers comes from the store's claim
//! protocol (`FOR UPDATE SKIP LOCKED` on PostgreSQL); nothing depends on
//! in-process synchronization, so any number of workers can share one
//! database.
//!
//! # Guarantees
//!
//! - Exactly-once **persistence**: the outbox row commits or rolls back
//!   with the business state ([`OutboxProducer::execute_and_append`]).
//! - At-least-once **delivery**: receivers deduplicate on `message_id`,
//!   which the inbox side does for you ([`InboxAdmitter`]).
//! - No cross-aggregate ordering; serialize at the producer if you need it.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use relaybox::{
//!     HttpTransport, NewOutboxMessage, OutboxProducer, OutboxRelay, PgMessageStore,
//!     RelayConfig, RelayboxConfig,
//! };
//!
//! let pool = sqlx::PgPool::connect(&database_url).await?;
//! let store = PgMessageStore::new(pool.clone());
//!
//! // Inside a request handler: business write + event, atomically.
//! let producer = OutboxProducer::new(pool);
//! producer
//!     .execute_and_append(save_order, NewOutboxMessage::new(
//!         "billing",
//!         "order.created",
//!         serde_json::json!({"order_id": 42}),
//!         "order",
//!         "42",
//!     ))
//!     .await?;
//!
//! // From a scheduled job: drain the outbox.
//! let transport = Arc::new(HttpTransport::new(config.http_transport_config())?);
//! let relay = OutboxRelay::new(store, transport, RelayConfig::default());
//! let stats = relay.process_all(0).await?;
//! tracing::info!(published = stats.published, "relay pass done");
//! ```
//!
//! # Feature Flags
//!
//! - `postgres` (default) — [`PgMessageStore`] and [`OutboxProducer`].
//!   Without it, the in-memory store remains for embedded/testing use.

mod admitter;
mod cleanup;
mod config;
mod dispatcher;
mod error;
mod handler;
mod ingress;
mod message;
#[cfg(feature = "postgres")]
mod producer;
mod relay;
pub mod store;
pub mod transport;

pub use admitter::InboxAdmitter;
pub use cleanup::{Cleanup, CleanupScope};
pub use config::{ProcessingConfig, RelayboxConfig, HTTP_DRIVER};
pub use dispatcher::{DispatchStats, DispatcherConfig, InboxDispatcher};
pub use error::{Error, Result};
pub use handler::{EventHandler, HandlerError, HandlerRegistry};
pub use ingress::{IngressConfig, WebhookStatus};
pub use message::{
    InboxMessage, InboxStatus, NewInboxMessage, NewOutboxMessage, OutboxMessage, OutboxStatus,
};
#[cfg(feature = "postgres")]
pub use producer::OutboxProducer;
pub use relay::{OutboxRelay, RelayConfig, RelayStats, RetryStats};
pub use store::{AdmitOutcome, InboxClaim, InboxStore, MemoryStore, OutboxStore};
#[cfg(feature = "postgres")]
pub use store::PgMessageStore;
pub use transport::{HttpTransport, HttpTransportConfig, Transport, TransportError};

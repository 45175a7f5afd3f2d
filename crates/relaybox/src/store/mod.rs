//! Storage abstraction for outbox and inbox messages.
//!
//! This module provides the [`OutboxStore`] and [`InboxStore`] traits that
//! abstract over storage backends. Two implementations are provided:
//!
//! - [`PgMessageStore`] — PostgreSQL storage for production (requires the
//!   `postgres` feature)
//! - [`MemoryStore`] — in-process storage for tests and examples

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

use std::future::Future;
use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

pub use memory::{MemoryInboxClaim, MemoryStore};
#[cfg(feature = "postgres")]
pub use postgres::{PgInboxClaim, PgMessageStore};
#[cfg(feature = "postgres")]
pub(crate) use postgres::insert_outbox as postgres_insert_outbox;

use crate::error::Result;
use crate::message::{InboxMessage, NewInboxMessage, NewOutboxMessage, OutboxMessage};

/// Result of an idempotent inbox admission.
#[derive(Debug, Clone)]
pub enum AdmitOutcome {
    /// A new row was created.
    Admitted(InboxMessage),
    /// A row with this `message_id` already exists; nothing was written.
    Duplicate,
}

impl AdmitOutcome {
    /// Returns `true` for [`AdmitOutcome::Duplicate`].
    pub fn is_duplicate(&self) -> bool {
        matches!(self, AdmitOutcome::Duplicate)
    }
}

/// Storage operations for the outbox side of the pipeline.
///
/// # Claim Protocol
///
/// Rows are claimed with row-level locking semantics:
/// 1. [`claim`](Self::claim) atomically re-checks `status = pending` under
///    `FOR UPDATE SKIP LOCKED` (or the backend equivalent) and transitions
///    the row to `processing`, stamping `processes_at`.
/// 2. A `None` return is a claim-miss: another worker owns the row or it
///    already advanced. Claim-misses are expected and benign.
/// 3. The publish outcome is recorded with [`mark_published`](Self::mark_published)
///    or [`mark_failed`](Self::mark_failed). Both are guarded by
///    `status = processing` and report whether the transition took effect.
/// 4. If a worker dies mid-claim, [`release_stuck`](Self::release_stuck)
///    returns the row to `pending` after the visibility timeout.
pub trait OutboxStore: Send + Sync + Clone + 'static {
    /// Insert a new `pending` row and return it.
    fn insert(
        &self,
        message: NewOutboxMessage,
    ) -> impl Future<Output = Result<OutboxMessage>> + Send;

    /// Fetch up to `limit` `pending` rows below the retry ceiling, oldest
    /// first, optionally restricted to one destination service.
    ///
    /// Selection order is a preference, not a guarantee: claim-time
    /// skip-locked semantics may let workers interleave.
    fn fetch_pending(
        &self,
        destination: Option<&str>,
        limit: u32,
        max_retries: u32,
    ) -> impl Future<Output = Result<Vec<OutboxMessage>>> + Send;

    /// Atomically claim one `pending` row for processing.
    ///
    /// Returns `None` on claim-miss.
    fn claim(&self, id: i64) -> impl Future<Output = Result<Option<OutboxMessage>>> + Send;

    /// Record a successful publication: `processing → published`,
    /// `published_at = now`.
    ///
    /// Returns `false` if the row was no longer in `processing` (e.g. a
    /// visibility-timeout pass reclaimed it during a slow publish).
    fn mark_published(&self, id: i64) -> impl Future<Output = Result<bool>> + Send;

    /// Record a failed publication: `processing → failed`,
    /// `retry_count + 1`, `last_error` set.
    fn mark_failed(&self, id: i64, error: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Fetch up to `limit` `failed` rows below the retry ceiling, oldest
    /// first.
    fn fetch_failed(
        &self,
        limit: u32,
        max_retries: u32,
    ) -> impl Future<Output = Result<Vec<OutboxMessage>>> + Send;

    /// Reset one `failed` row to `pending` for an explicit retry.
    ///
    /// Returns `false` if the row was not in `failed` (another retry is
    /// already in flight).
    fn reset_failed(&self, id: i64) -> impl Future<Output = Result<bool>> + Send;

    /// Visibility timeout pass: return `processing` rows whose claim is
    /// older than `stale_after` to `pending`, without touching
    /// `retry_count`. Returns the number of rows released.
    fn release_stuck(&self, stale_after: Duration) -> impl Future<Output = Result<u64>> + Send;

    /// Delete `published` rows with `published_at` before `cutoff`.
    /// Never touches any other status.
    fn delete_published_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Look up a row by its externally visible message id.
    fn get(&self, message_id: Uuid)
        -> impl Future<Output = Result<Option<OutboxMessage>>> + Send;
}

/// A claimed inbox row held under an open unit of work.
///
/// Unlike the outbox side — where the transport call must happen outside
/// any transaction — inbox handlers are in-process, so the claim keeps its
/// unit of work open across the handler call: the `pending → processing`
/// transition, the handler, and the outcome mark all commit together.
///
/// Settle the claim with [`succeed`](Self::succeed) or
/// [`fail`](Self::fail). A claim dropped unsettled is abandoned: the
/// PostgreSQL backend rolls the transaction back (the row returns to its
/// pre-claim status immediately), the in-memory backend recovers the row
/// through the visibility timeout.
pub trait InboxClaim: Send {
    /// The claimed row, already transitioned to `processing`.
    fn message(&self) -> &InboxMessage;

    /// Record success: `processing → processed`, committed together with
    /// the claim.
    fn succeed(self) -> impl Future<Output = Result<()>> + Send;

    /// Record failure: `processing → failed`, `retry_count + 1`,
    /// `last_error` set, committed together with the claim.
    fn fail(self, error: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Storage operations for the inbox side of the pipeline.
///
/// Admission carries the idempotency contract: `message_id` is UNIQUE, and
/// the constraint — not any pre-check — is the authority on duplicates.
/// Claims differ from [`OutboxStore`]'s: they hand back an [`InboxClaim`]
/// whose unit of work stays open until the dispatch outcome is recorded,
/// so claim, handler and mark commit as one.
pub trait InboxStore: Send + Sync + Clone + 'static {
    /// Claim handle holding the open unit of work.
    type Claim: InboxClaim;

    /// Idempotently persist an inbound message as `pending`.
    ///
    /// Race-safe: two concurrent admissions of the same `message_id` yield
    /// exactly one row and exactly one [`AdmitOutcome::Admitted`].
    fn admit(&self, message: NewInboxMessage)
        -> impl Future<Output = Result<AdmitOutcome>> + Send;

    /// Fetch up to `limit` `pending` rows below the retry ceiling, oldest
    /// first.
    fn fetch_pending(
        &self,
        limit: u32,
        max_retries: u32,
    ) -> impl Future<Output = Result<Vec<InboxMessage>>> + Send;

    /// Open a unit of work and claim one `pending` row inside it
    /// (`pending → processing`, skip-locked). `None` is a claim-miss.
    fn claim(&self, id: i64) -> impl Future<Output = Result<Option<Self::Claim>>> + Send;

    /// Same, with claim predicate `status = failed` for an explicit retry
    /// (`failed → processing` directly).
    fn claim_failed(&self, id: i64) -> impl Future<Output = Result<Option<Self::Claim>>> + Send;

    /// Fetch up to `limit` `failed` rows below the retry ceiling.
    fn fetch_failed(
        &self,
        limit: u32,
        max_retries: u32,
    ) -> impl Future<Output = Result<Vec<InboxMessage>>> + Send;

    /// Visibility timeout pass, as on the outbox side.
    fn release_stuck(&self, stale_after: Duration) -> impl Future<Output = Result<u64>> + Send;

    /// Delete `processed` rows with `processes_at` before `cutoff`.
    fn delete_processed_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Look up a row by its externally visible message id.
    fn get(&self, message_id: Uuid) -> impl Future<Output = Result<Option<InboxMessage>>> + Send;
}

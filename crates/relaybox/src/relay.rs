//! Outbox relay: drains pending outbox rows through a transport.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::message::OutboxMessage;
use crate::store::OutboxStore;
use crate::transport::Transport;

/// Configuration for the outbox relay.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use relaybox::RelayConfig;
///
/// let config = RelayConfig {
///     max_retries: 3,
///     batch_size: 100,
///     stuck_after: Duration::from_secs(300),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Retry ceiling: rows with `retry_count >= max_retries` are excluded
    /// from both the normal and the retry batch. Default: 5.
    pub max_retries: u32,

    /// Batch size used when a caller passes `limit = 0`. Default: 50.
    pub batch_size: u32,

    /// Visibility timeout: `processing` rows claimed longer ago than this
    /// are returned to `pending` at the start of each run, without counting
    /// a retry. Should exceed twice the scheduled run interval.
    /// Default: 10 minutes.
    pub stuck_after: Duration,

    /// Optional deadline for a single batch run. On expiry the relay
    /// finishes the current row and returns partial stats.
    /// Default: unbounded.
    pub batch_deadline: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            batch_size: 50,
            stuck_after: Duration::from_secs(600),
            batch_deadline: None,
        }
    }
}

/// Aggregate outcome of one relay pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Rows delivered and marked `published`.
    pub published: u64,
    /// Rows whose publication failed and that moved to `failed`.
    pub failed: u64,
    /// Claim-misses: rows owned by a competing worker or already advanced.
    pub skipped: u64,
}

/// Aggregate outcome of one retry pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryStats {
    /// Rows re-published successfully.
    pub retried: u64,
    /// Rows that could not be re-claimed or failed again.
    pub failed: u64,
}

/// Batch-polling worker that claims pending outbox rows and drives them
/// through the [`Transport`].
///
/// One logical pass = [`process_all`](Self::process_all); scheduling of
/// passes is external (cron, CLI, a loop in the host service). Multiple
/// relays may run concurrently against the same database: per-row
/// exclusivity comes from the store's claim protocol, not from in-process
/// synchronization.
///
/// # Lifecycle per row
///
/// 1. Claim (`pending → processing`, skip-locked; a miss is benign)
/// 2. Publish via the transport, outside any database transaction
/// 3. Record the outcome (`published`, or `failed` with `retry_count + 1`)
///
/// Per-row errors are contained: the row is marked, logged, and the pass
/// continues. Only database unavailability aborts a pass.
pub struct OutboxRelay<S> {
    store: S,
    transport: Arc<dyn Transport>,
    config: RelayConfig,
}

impl<S: OutboxStore> OutboxRelay<S> {
    /// Create a relay over a store and transport.
    pub fn new(store: S, transport: Arc<dyn Transport>, config: RelayConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// The relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Process up to `limit` pending rows for any destination.
    ///
    /// `limit = 0` is coerced to the configured `batch_size`.
    pub async fn process_all(&self, limit: u32) -> Result<RelayStats> {
        self.process(None, limit).await
    }

    /// Process up to `limit` pending rows for one destination service.
    pub async fn process_for_destination(
        &self,
        destination: &str,
        limit: u32,
    ) -> Result<RelayStats> {
        self.process(Some(destination), limit).await
    }

    /// Re-drive failed rows below the retry ceiling.
    ///
    /// Each row is first reset `failed → pending`, then taken through the
    /// normal claim protocol. A row that cannot be reset or re-claimed
    /// (another retry is already in flight) counts under `failed`.
    pub async fn retry_failed(&self, limit: u32) -> Result<RetryStats> {
        let limit = self.effective_limit(limit);
        let deadline = self.deadline();
        let batch = self
            .store
            .fetch_failed(limit, self.config.max_retries)
            .await?;

        let mut stats = RetryStats::default();
        for row in batch {
            if expired(deadline) {
                debug!(retried = stats.retried, "Batch deadline reached, returning partial stats");
                break;
            }
            if !self.store.reset_failed(row.id).await? {
                stats.failed += 1;
                continue;
            }
            let Some(claimed) = self.store.claim(row.id).await? else {
                stats.failed += 1;
                continue;
            };
            if self.publish_one(&claimed).await? {
                stats.retried += 1;
            } else {
                stats.failed += 1;
            }
        }

        info!(
            retried = stats.retried,
            failed = stats.failed,
            "Outbox retry pass complete"
        );
        Ok(stats)
    }

    async fn process(&self, destination: Option<&str>, limit: u32) -> Result<RelayStats> {
        let limit = self.effective_limit(limit);

        // Crash recovery first: claims left behind by a dead worker become
        // eligible again before this batch is selected.
        let released = self.store.release_stuck(self.config.stuck_after).await?;
        if released > 0 {
            warn!(released, "Released stuck processing rows back to pending");
        }

        let deadline = self.deadline();
        let batch = self
            .store
            .fetch_pending(destination, limit, self.config.max_retries)
            .await?;

        let mut stats = RelayStats::default();
        for row in batch {
            if expired(deadline) {
                debug!(
                    published = stats.published,
                    "Batch deadline reached, returning partial stats"
                );
                break;
            }
            let Some(claimed) = self.store.claim(row.id).await? else {
                // Another worker owns it or the row already advanced.
                stats.skipped += 1;
                continue;
            };
            if self.publish_one(&claimed).await? {
                stats.published += 1;
            } else {
                stats.failed += 1;
            }
        }

        info!(
            published = stats.published,
            failed = stats.failed,
            skipped = stats.skipped,
            destination = destination.unwrap_or("*"),
            "Outbox relay pass complete"
        );
        Ok(stats)
    }

    /// Publish one claimed row and record the outcome. Returns `true` on
    /// successful publication.
    async fn publish_one(&self, row: &OutboxMessage) -> Result<bool> {
        match self.transport.publish(row).await {
            Ok(()) => {
                if !self.store.mark_published(row.id).await? {
                    // A visibility-timeout pass reclaimed the row during a
                    // slow publish; delivery stands, at-least-once allows
                    // the duplicate.
                    warn!(
                        message_id = %row.message_id,
                        "Publish outcome could not be recorded: row left processing"
                    );
                }
                debug!(
                    message_id = %row.message_id,
                    destination = %row.destination_service,
                    event_type = %row.event_type,
                    "Message published"
                );
                Ok(true)
            }
            Err(e) => {
                warn!(
                    message_id = %row.message_id,
                    destination = %row.destination_service,
                    event_type = %row.event_type,
                    attempt = row.retry_count + 1,
                    error = %e,
                    "Publish failed"
                );
                self.store.mark_failed(row.id, &e.to_string()).await?;
                Ok(false)
            }
        }
    }

    fn effective_limit(&self, limit: u32) -> u32 {
        if limit == 0 {
            self.config.batch_size.max(1)
        } else {
            limit
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.config.batch_deadline.map(|d| Instant::now() + d)
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

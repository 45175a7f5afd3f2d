//! Inbox dispatcher: drains pending inbox rows into registered handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::handler::HandlerRegistry;
use crate::relay::RetryStats;
use crate::store::{InboxClaim, InboxStore};

/// Configuration for the inbox dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Retry ceiling, as on the outbox side. Default: 5.
    pub max_retries: u32,

    /// Batch size used when a caller passes `limit = 0`. Default: 50.
    pub batch_size: u32,

    /// Visibility timeout for `processing` rows left by a dead worker.
    /// Default: 10 minutes.
    pub stuck_after: Duration,

    /// Upper bound on a single handler invocation, and thereby on how long
    /// the claim's transaction stays open. A timeout is a handler failure:
    /// the row moves to `failed`. Default: 30 seconds.
    pub handler_timeout: Duration,

    /// Optional deadline for a single batch run.
    pub batch_deadline: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            batch_size: 50,
            stuck_after: Duration::from_secs(600),
            handler_timeout: Duration::from_secs(30),
            batch_deadline: None,
        }
    }
}

/// Aggregate outcome of one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Rows whose handler succeeded; now `processed`.
    pub processed: u64,
    /// Rows whose handler failed or timed out; now `failed`.
    pub failed: u64,
    /// Rows with no registered handler; left `pending` so a handler can be
    /// deployed later.
    pub no_handler: u64,
}

/// Mirror of the outbox relay for the inbound direction.
///
/// The "transport" is a lookup in the [`HandlerRegistry`] keyed by
/// `event_type`. A row with no registered handler is never claimed: it
/// stays `pending` and is counted under `no_handler`, so that registering
/// a handler later picks it up.
///
/// Unlike the relay — which must release its claim transaction before
/// touching the network — handlers are in-process, so each row is
/// processed inside one short transaction: claim, handler invocation and
/// the outcome mark commit together through the store's [`InboxClaim`].
pub struct InboxDispatcher<S> {
    store: S,
    registry: Arc<HandlerRegistry>,
    config: DispatcherConfig,
}

impl<S: InboxStore> InboxDispatcher<S> {
    /// Create a dispatcher over a store and registry.
    pub fn new(store: S, registry: Arc<HandlerRegistry>, config: DispatcherConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// The handler registry, for runtime registration.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Process up to `limit` pending rows.
    ///
    /// `limit = 0` is coerced to the configured `batch_size`.
    pub async fn process_all(&self, limit: u32) -> Result<DispatchStats> {
        let limit = self.effective_limit(limit);

        let released = self.store.release_stuck(self.config.stuck_after).await?;
        if released > 0 {
            warn!(released, "Released stuck processing rows back to pending");
        }

        let deadline = self.deadline();
        let batch = self
            .store
            .fetch_pending(limit, self.config.max_retries)
            .await?;

        let mut stats = DispatchStats::default();
        for row in batch {
            if expired(deadline) {
                debug!(
                    processed = stats.processed,
                    "Batch deadline reached, returning partial stats"
                );
                break;
            }
            // Look the handler up before claiming so an unhandled row never
            // leaves `pending`.
            if self.registry.get(&row.event_type).is_none() {
                debug!(
                    message_id = %row.message_id,
                    event_type = %row.event_type,
                    "No handler registered, leaving row pending"
                );
                stats.no_handler += 1;
                continue;
            }
            let Some(claim) = self.store.claim(row.id).await? else {
                // Claim-miss: a competing dispatcher owns the row.
                continue;
            };
            if self.dispatch_one(claim).await? {
                stats.processed += 1;
            } else {
                stats.failed += 1;
            }
        }

        info!(
            processed = stats.processed,
            failed = stats.failed,
            no_handler = stats.no_handler,
            "Inbox dispatch pass complete"
        );
        Ok(stats)
    }

    /// Re-drive failed rows below the retry ceiling.
    ///
    /// Claims use the `failed → processing` path directly; a row that
    /// cannot be re-claimed, or that has no handler, counts under `failed`.
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
            if self.registry.get(&row.event_type).is_none() {
                debug!(
                    message_id = %row.message_id,
                    event_type = %row.event_type,
                    "No handler registered for failed row"
                );
                stats.failed += 1;
                continue;
            }
            let Some(claim) = self.store.claim_failed(row.id).await? else {
                stats.failed += 1;
                continue;
            };
            if self.dispatch_one(claim).await? {
                stats.retried += 1;
            } else {
                stats.failed += 1;
            }
        }

        info!(
            retried = stats.retried,
            failed = stats.failed,
            "Inbox retry pass complete"
        );
        Ok(stats)
    }

    /// Invoke the handler for one claimed row and settle the claim, so the
    /// status transition and the handler outcome commit as one unit of
    /// work. Returns `true` when the row was processed.
    async fn dispatch_one(&self, claim: S::Claim) -> Result<bool> {
        let row = claim.message().clone();

        // Re-resolve: the registry may have changed since the pre-claim
        // check, and runtime registration must win over staleness.
        let Some(handler) = self.registry.get(&row.event_type) else {
            // The handler vanished between lookup and claim; record the
            // failure so the retry pass can pick the row up once a handler
            // is back.
            warn!(
                message_id = %row.message_id,
                event_type = %row.event_type,
                "Handler disappeared after claim"
            );
            claim.fail("handler disappeared after claim").await?;
            return Ok(false);
        };

        let outcome =
            tokio::time::timeout(self.config.handler_timeout, handler.handle(&row)).await;

        match outcome {
            Ok(Ok(())) => {
                claim.succeed().await?;
                debug!(
                    message_id = %row.message_id,
                    source = %row.source_service,
                    event_type = %row.event_type,
                    "Message processed"
                );
                Ok(true)
            }
            Ok(Err(e)) => {
                warn!(
                    message_id = %row.message_id,
                    source = %row.source_service,
                    event_type = %row.event_type,
                    attempt = row.retry_count + 1,
                    error = %e,
                    "Handler failed"
                );
                claim.fail(&e.to_string()).await?;
                Ok(false)
            }
            Err(_) => {
                let error = format!(
                    "handler timed out after {}s",
                    self.config.handler_timeout.as_secs_f64()
                );
                warn!(
                    message_id = %row.message_id,
                    event_type = %row.event_type,
                    error = %error,
                    "Handler timed out"
                );
                claim.fail(&error).await?;
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

//! Retention cleanup for terminal rows.

use std::fmt;
use std::str::FromStr;

use time::OffsetDateTime;
use tracing::info;

use crate::error::{Error, Result};
use crate::store::{InboxStore, OutboxStore};

/// Which tables a cleanup run touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupScope {
    Outbox,
    Inbox,
    Both,
}

impl FromStr for CleanupScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "outbox" => Ok(CleanupScope::Outbox),
            "inbox" => Ok(CleanupScope::Inbox),
            "both" => Ok(CleanupScope::Both),
            other => Err(format!("unknown cleanup scope: {other} (expected outbox|inbox|both)")),
        }
    }
}

impl fmt::Display for CleanupScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CleanupScope::Outbox => "outbox",
            CleanupScope::Inbox => "inbox",
            CleanupScope::Both => "both",
        })
    }
}

/// Periodic purge of terminal rows older than a retention window.
///
/// Only `published` outbox rows (by `published_at`) and `processed` inbox
/// rows (by `processes_at`) are ever deleted. `failed` rows require
/// operator inspection and are never touched, nor is anything still in
/// flight.
pub struct Cleanup<S> {
    store: S,
}

impl<S: OutboxStore + InboxStore> Cleanup<S> {
    /// Create a cleanup over a store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Delete terminal rows older than `retention_days`. Returns the total
    /// number of rows deleted across the selected scope.
    pub async fn purge(&self, scope: CleanupScope, retention_days: u32) -> Result<u64> {
        if retention_days == 0 {
            return Err(Error::InvalidArgument(
                "retention_days must be at least 1".into(),
            ));
        }
        let cutoff = OffsetDateTime::now_utc() - time::Duration::days(retention_days as i64);

        let mut deleted = 0;
        if matches!(scope, CleanupScope::Outbox | CleanupScope::Both) {
            deleted += self.store.delete_published_before(cutoff).await?;
        }
        if matches!(scope, CleanupScope::Inbox | CleanupScope::Both) {
            deleted += self.store.delete_processed_before(cutoff).await?;
        }

        info!(%scope, retention_days, deleted, "Cleanup pass complete");
        Ok(deleted)
    }
}

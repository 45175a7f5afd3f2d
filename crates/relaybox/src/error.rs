//! Error types for relaybox.

use thiserror::Error;

use crate::transport::TransportError;

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in relaybox operations.
///
/// Batch entrypoints ([`OutboxRelay`](crate::OutboxRelay),
/// [`InboxDispatcher`](crate::InboxDispatcher)) contain per-row failures and
/// return aggregate stats; an `Error` escaping a batch means the
/// infrastructure itself (the database) is unavailable, or a row was
/// observed in an impossible state.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to serialize or deserialize payload/header data.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// PostgreSQL storage error.
    ///
    /// Preserves the full `sqlx::Error` for matching on specific database
    /// error conditions (connection timeout, constraint violation, etc.).
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid configuration (unknown driver, missing service mapping).
    ///
    /// Fatal at startup; a per-row configuration problem fails that row
    /// immediately without entering a retry loop.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level publication failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A required ingress field was absent from both headers and body.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A stored row violates the state-machine contract.
    ///
    /// This is an invariant violation (e.g. an unparseable status value),
    /// not an operational failure. Surface loudly; do not retry.
    #[error("corrupt row {id}: {detail}")]
    CorruptRow {
        /// Local primary key of the offending row.
        id: i64,
        /// What was wrong with it.
        detail: String,
    },

    /// Caller passed an argument outside the accepted domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Create a corrupt-row error with context.
    pub fn corrupt_row(id: i64, detail: impl Into<String>) -> Self {
        Error::CorruptRow {
            id,
            detail: detail.into(),
        }
    }
}

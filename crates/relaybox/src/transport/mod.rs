//! Pluggable delivery sinks for outbox messages.

mod http;

use async_trait::async_trait;
use thiserror::Error;

pub use http::{HttpTransport, HttpTransportConfig};

use crate::message::OutboxMessage;

/// Publication failure, split by whether retrying can help.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No endpoint is configured for the destination service.
    ///
    /// A configuration problem: the row fails immediately and retrying
    /// without a config change will not succeed.
    #[error("no base URL configured for destination service `{0}`")]
    UnknownDestination(String),

    /// The request could not be completed (connect error, timeout, invalid
    /// header material). Recoverable by retry.
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The destination answered with a non-2xx status. Recoverable by retry.
    #[error("destination returned HTTP {status}")]
    Status { status: u16 },
}

impl TransportError {
    /// `true` when the failure is a configuration problem rather than a
    /// transient delivery fault.
    pub fn is_configuration(&self) -> bool {
        matches!(self, TransportError::UnknownDestination(_))
    }
}

/// A sink that ships one outbox row to its destination.
///
/// Publication is synchronous from the relay's perspective: the relay
/// claims a row, calls [`publish`](Transport::publish), and records the
/// outcome. Implementations MUST signal failure through the returned
/// error — silent success-on-failure corrupts the relay state machine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one message. The row is guaranteed to be in `processing`
    /// (claimed by the calling relay) and is delivered at most once per
    /// claim.
    async fn publish(&self, message: &OutboxMessage) -> Result<(), TransportError>;

    /// Cheap readiness probe; `true` when the transport is configured well
    /// enough to attempt publication.
    fn healthy(&self) -> bool {
        true
    }
}

//! Idempotent ingress for inbound messages.

use tracing::debug;

use crate::error::Result;
use crate::message::NewInboxMessage;
use crate::store::{AdmitOutcome, InboxStore};

/// Persists inbound messages with idempotent admission.
///
/// Duplicate delivery is normal under at-least-once transports: a repeat
/// of an already-seen `message_id` is dropped — not re-executed, not an
/// error. The store's UNIQUE constraint on `message_id` is the authority;
/// the admitter adds nothing but logging on top of it.
pub struct InboxAdmitter<S> {
    store: S,
}

impl<S: InboxStore> InboxAdmitter<S> {
    /// Create an admitter over a store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Persist one inbound message as `pending`, or report it as a
    /// duplicate.
    ///
    /// Race-safe: concurrent admissions of the same `message_id` yield
    /// exactly one row and exactly one [`AdmitOutcome::Admitted`].
    pub async fn admit(&self, message: NewInboxMessage) -> Result<AdmitOutcome> {
        let message_id = message.message_id;
        let source = message.source_service.clone();
        let event_type = message.event_type.clone();

        let outcome = self.store.admit(message).await?;
        match &outcome {
            AdmitOutcome::Admitted(_) => {
                debug!(
                    message_id = %message_id,
                    source = %source,
                    event_type = %event_type,
                    "Message admitted"
                );
            }
            AdmitOutcome::Duplicate => {
                debug!(
                    message_id = %message_id,
                    source = %source,
                    event_type = %event_type,
                    "Duplicate message dropped"
                );
            }
        }
        Ok(outcome)
    }
}

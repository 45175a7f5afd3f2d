//! Mapping from webhook requests to inbox admissions.
//!
//! The HTTP endpoint itself lives in the host service; this module owns
//! the translation it delegates to: pulling the message identity out of
//! headers (with body fallback), capturing custom headers, and mapping the
//! admission outcome to a response status.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::message::NewInboxMessage;
use crate::store::AdmitOutcome;

/// Header names and the custom-header prefix recognized at ingress.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    /// Header carrying the message id. Default `X-Message-Id`.
    pub message_id: String,
    /// Header carrying the sending service name. Default `X-Source-Service`.
    pub source_service: String,
    /// Header carrying the event type. Default `X-Event-Type`.
    pub event_type: String,
    /// Headers starting with this prefix are captured into the row's
    /// `headers` field. Default `X-`.
    pub custom_prefix: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            message_id: "X-Message-Id".into(),
            source_service: "X-Source-Service".into(),
            event_type: "X-Event-Type".into(),
            custom_prefix: "X-".into(),
        }
    }
}

impl IngressConfig {
    /// Build a [`NewInboxMessage`] from a webhook's headers and JSON body.
    ///
    /// Identity fields are read from the configured headers
    /// (case-insensitively), falling back to top-level body fields
    /// (`message_id`, `source_service`, `event_type`). Headers under
    /// `custom_prefix` — other than the identity headers themselves — are
    /// captured into the row's header map. The body becomes the payload
    /// verbatim.
    pub fn extract(
        &self,
        headers: &HashMap<String, String>,
        body: &Value,
    ) -> Result<NewInboxMessage> {
        let message_id = self
            .lookup(headers, body, &self.message_id, "message_id")
            .ok_or(Error::MissingField("message_id"))?;
        let message_id: Uuid = message_id
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("message id is not a UUID: {message_id}")))?;

        let source_service = self
            .lookup(headers, body, &self.source_service, "source_service")
            .ok_or(Error::MissingField("source_service"))?;
        let event_type = self
            .lookup(headers, body, &self.event_type, "event_type")
            .ok_or(Error::MissingField("event_type"))?;

        let captured = self.capture_custom(headers);

        Ok(
            NewInboxMessage::new(message_id, source_service, event_type, body.clone())
                .headers(captured),
        )
    }

    fn lookup(
        &self,
        headers: &HashMap<String, String>,
        body: &Value,
        header_name: &str,
        body_field: &str,
    ) -> Option<String> {
        headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(header_name))
            .map(|(_, value)| value.clone())
            .or_else(|| {
                body.get(body_field)
                    .and_then(Value::as_str)
                    .map(str::to_owned)
            })
    }

    fn capture_custom(&self, headers: &HashMap<String, String>) -> HashMap<String, String> {
        let identity = [&self.message_id, &self.source_service, &self.event_type];
        headers
            .iter()
            .filter(|(name, _)| {
                name.get(..self.custom_prefix.len())
                    .is_some_and(|p| p.eq_ignore_ascii_case(&self.custom_prefix))
            })
            .filter(|(name, _)| !identity.iter().any(|id| name.eq_ignore_ascii_case(id)))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// Response status for the webhook endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookStatus {
    /// New admission.
    Accepted,
    /// Duplicate `message_id`; already absorbed.
    AlreadyProcessed,
    /// Identity fields missing or malformed.
    BadRequest,
    /// Storage or other internal failure.
    InternalError,
}

impl WebhookStatus {
    /// HTTP status code to answer with.
    pub fn code(&self) -> u16 {
        match self {
            WebhookStatus::Accepted => 202,
            WebhookStatus::AlreadyProcessed => 200,
            WebhookStatus::BadRequest => 400,
            WebhookStatus::InternalError => 500,
        }
    }

    /// Map an admission attempt to a response status.
    pub fn for_outcome(outcome: &Result<AdmitOutcome>) -> Self {
        match outcome {
            Ok(AdmitOutcome::Admitted(_)) => WebhookStatus::Accepted,
            Ok(AdmitOutcome::Duplicate) => WebhookStatus::AlreadyProcessed,
            Err(Error::MissingField(_)) | Err(Error::InvalidArgument(_)) => {
                WebhookStatus::BadRequest
            }
            Err(_) => WebhookStatus::InternalError,
        }
    }
}

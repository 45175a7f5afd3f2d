//! HTTP reference transport.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{Transport, TransportError};
use crate::error::{Error, Result};
use crate::message::OutboxMessage;

/// Header names the transport always sets itself; row headers never
/// override these.
const RESERVED_HEADERS: [&str; 4] = [
    "content-type",
    "x-message-id",
    "x-source-service",
    "x-event-type",
];

/// Topic segment used when a row carries no `destination_topic`.
const DEFAULT_TOPIC: &str = "events";

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Local service identity, sent as `X-Source-Service`.
    pub service_name: String,
    /// Logical destination service name → base URL.
    pub services: HashMap<String, String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpTransportConfig {
    /// Create a config with the default 30 second timeout.
    pub fn new(service_name: impl Into<String>, services: HashMap<String, String>) -> Self {
        Self {
            service_name: service_name.into(),
            services,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Reference transport: `POST <service-base>/<topic-or-events>` with the
/// row payload as a JSON body.
///
/// Mandatory headers: `Content-Type: application/json`, `X-Message-Id`,
/// `X-Source-Service`, `X-Event-Type`. Row headers are merged afterwards
/// and cannot override the reserved names. Any connection error, timeout,
/// or non-2xx response fails publication.
pub struct HttpTransport {
    config: HttpTransportConfig,
    client: Client,
}

impl HttpTransport {
    /// Build the transport and its HTTP client.
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Resolve the full URL for a message, or the configuration error that
    /// makes it undeliverable.
    fn resolve_url(&self, message: &OutboxMessage) -> std::result::Result<String, TransportError> {
        let base = self
            .config
            .services
            .get(&message.destination_service)
            .ok_or_else(|| {
                TransportError::UnknownDestination(message.destination_service.clone())
            })?;
        let topic = message.destination_topic.as_deref().unwrap_or(DEFAULT_TOPIC);
        Ok(format!("{}/{}", base.trim_end_matches('/'), topic))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn publish(&self, message: &OutboxMessage) -> std::result::Result<(), TransportError> {
        let url = self.resolve_url(message)?;

        debug!(
            message_id = %message.message_id,
            destination = %message.destination_service,
            event_type = %message.event_type,
            url = %url,
            "Publishing message"
        );

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Message-Id", message.message_id.to_string())
            .header("X-Source-Service", &self.config.service_name)
            .header("X-Event-Type", &message.event_type)
            .json(&message.payload);

        for (name, value) in &message.headers {
            if RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|source| TransportError::Request {
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn healthy(&self) -> bool {
        !self.config.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{NewOutboxMessage, OutboxStatus};
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn message(dest: &str, topic: Option<&str>) -> OutboxMessage {
        let new = NewOutboxMessage::new(dest, "order.created", serde_json::json!({}), "order", "1");
        OutboxMessage {
            id: 1,
            message_id: Uuid::now_v7(),
            aggregate_type: new.aggregate_type,
            aggregate_id: new.aggregate_id,
            event_type: new.event_type,
            destination_service: new.destination_service,
            destination_topic: topic.map(str::to_owned),
            payload: new.payload,
            headers: new.headers,
            status: OutboxStatus::Processing,
            retry_count: 0,
            last_error: None,
            created_at: OffsetDateTime::now_utc(),
            processes_at: Some(OffsetDateTime::now_utc()),
            published_at: None,
        }
    }

    fn transport(services: &[(&str, &str)]) -> HttpTransport {
        let services = services
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HttpTransport::new(HttpTransportConfig::new("svc-local", services)).unwrap()
    }

    #[test]
    fn resolves_default_topic() {
        let t = transport(&[("svc-a", "http://svc-a.internal")]);
        let url = t.resolve_url(&message("svc-a", None)).unwrap();
        assert_eq!(url, "http://svc-a.internal/events");
    }

    #[test]
    fn resolves_topic_override_and_trailing_slash() {
        let t = transport(&[("svc-a", "http://svc-a.internal/")]);
        let url = t.resolve_url(&message("svc-a", Some("orders"))).unwrap();
        assert_eq!(url, "http://svc-a.internal/orders");
    }

    #[test]
    fn unknown_destination_is_a_configuration_error() {
        let t = transport(&[("svc-a", "http://svc-a.internal")]);
        let err = t.resolve_url(&message("svc-b", None)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn healthy_requires_a_service_map() {
        assert!(transport(&[("svc-a", "http://svc-a.internal")]).healthy());
        assert!(!transport(&[]).healthy());
    }
}

//! Library configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::dispatcher::DispatcherConfig;
use crate::error::{Error, Result};
use crate::ingress::IngressConfig;
use crate::relay::RelayConfig;
use crate::transport::HttpTransportConfig;

/// The only transport driver currently shipped.
pub const HTTP_DRIVER: &str = "http";

/// Processing knobs shared by the relay and the dispatcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Default batch size when a caller passes `limit = 0`. Default: 50.
    pub batch_size: u32,
    /// Retry ceiling. Default: 5.
    pub max_retries: u32,
    /// Minimum seconds between retries of the same row. Advisory: enforced
    /// by how often the worker is scheduled, not by the relay itself.
    pub retry_delay_secs: u64,
    /// Visibility timeout in seconds for `processing` rows left behind by
    /// a dead worker. Default: 600 (twice a 5-minute cron cadence).
    pub stuck_after_secs: u64,
    /// Upper bound in seconds on one inbox handler invocation. Default: 30.
    pub handler_timeout_secs: u64,
    /// HTTP transport request timeout in seconds. Default: 30.
    pub http_timeout_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retries: 5,
            retry_delay_secs: 60,
            stuck_after_secs: 600,
            handler_timeout_secs: 30,
            http_timeout_secs: 30,
        }
    }
}

/// Top-level configuration, deserialized from the host's config file.
///
/// # Example (TOML)
///
/// ```toml
/// service_name = "orders"
/// driver = "http"
///
/// [services]
/// billing = "http://billing.internal:8080"
///
/// [headers]
/// custom_prefix = "X-"
///
/// [processing]
/// batch_size = 100
/// max_retries = 5
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RelayboxConfig {
    /// Local service identity; the value of `X-Source-Service` on
    /// outbound messages.
    pub service_name: String,
    /// Transport selector. Only `"http"` is recognized; anything else is
    /// fatal at startup.
    #[serde(default = "default_driver")]
    pub driver: String,
    /// Logical destination service name → base URL.
    #[serde(default)]
    pub services: HashMap<String, String>,
    /// Ingress header names and custom-header prefix.
    #[serde(default)]
    pub headers: IngressConfig,
    /// Relay/dispatcher processing knobs.
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Connection string for the CLI. `DATABASE_URL` overrides it.
    #[serde(default)]
    pub database_url: Option<String>,
}

fn default_driver() -> String {
    HTTP_DRIVER.to_string()
}

impl RelayboxConfig {
    /// Reject configurations that can only fail later.
    pub fn validate(&self) -> Result<()> {
        if self.driver != HTTP_DRIVER {
            return Err(Error::Config(format!(
                "unknown transport driver `{}` (expected `{HTTP_DRIVER}`)",
                self.driver
            )));
        }
        if self.service_name.is_empty() {
            return Err(Error::Config("service_name must not be empty".into()));
        }
        Ok(())
    }

    /// Relay configuration derived from the processing section.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            max_retries: self.processing.max_retries,
            batch_size: self.processing.batch_size,
            stuck_after: Duration::from_secs(self.processing.stuck_after_secs),
            batch_deadline: None,
        }
    }

    /// Dispatcher configuration derived from the processing section.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_retries: self.processing.max_retries,
            batch_size: self.processing.batch_size,
            stuck_after: Duration::from_secs(self.processing.stuck_after_secs),
            handler_timeout: Duration::from_secs(self.processing.handler_timeout_secs),
            batch_deadline: None,
        }
    }

    /// HTTP transport configuration: identity, service map, timeout.
    pub fn http_transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            service_name: self.service_name.clone(),
            services: self.services.clone(),
            timeout: Duration::from_secs(self.processing.http_timeout_secs),
        }
    }
}

//! Event handlers and the in-memory handler registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::message::InboxMessage;

/// Failure reported by an event handler.
///
/// Stored verbatim as the row's `last_error`; the dispatcher retries the
/// row until the retry ceiling.
#[derive(Debug)]
pub struct HandlerError(String);

impl HandlerError {
    /// Create an error from any displayable cause.
    pub fn new(cause: impl fmt::Display) -> Self {
        Self(cause.to_string())
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for HandlerError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Handler for one inbound event type.
///
/// Handlers run in-process and may be invoked more than once for the same
/// message (at-least-once dispatch); they must be idempotent or tolerate
/// replays.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use relaybox::{EventHandler, HandlerError, InboxMessage};
///
/// struct OrderCreatedHandler;
///
/// #[async_trait]
/// impl EventHandler for OrderCreatedHandler {
///     fn event_type(&self) -> &str {
///         "order.created"
///     }
///
///     async fn handle(&self, message: &InboxMessage) -> Result<(), HandlerError> {
///         let order_id = message.payload["order_id"]
///             .as_str()
///             .ok_or(HandlerError::from("payload missing order_id"))?;
///         tracing::info!(order_id, "order received");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// The event type this handler consumes. Used as the registry key.
    fn event_type(&self) -> &str;

    /// Process one claimed inbox message.
    async fn handle(&self, message: &InboxMessage) -> Result<(), HandlerError>;
}

/// In-memory map from event type to handler.
///
/// Built at startup and read-only on the hot path; runtime registration is
/// a plain insert behind a reader-writer lock, safe against concurrent
/// dispatchers. Unknown event types are reported as `no_handler` by the
/// dispatcher and never executed.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its [`EventHandler::event_type`] identity.
    ///
    /// Returns the handler previously registered for that event type, if
    /// any.
    pub fn register(&self, handler: Arc<dyn EventHandler>) -> Option<Arc<dyn EventHandler>> {
        let key = handler.event_type().to_string();
        self.handlers
            .write()
            .expect("handler registry lock poisoned")
            .insert(key, handler)
    }

    /// Register several handlers at once.
    pub fn register_all(&self, handlers: impl IntoIterator<Item = Arc<dyn EventHandler>>) {
        for handler in handlers {
            self.register(handler);
        }
    }

    /// Look up the handler for an event type.
    pub fn get(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers
            .read()
            .expect("handler registry lock poisoned")
            .get(event_type)
            .cloned()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .expect("handler registry lock poisoned")
            .len()
    }

    /// `true` when no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl EventHandler for Named {
        fn event_type(&self) -> &str {
            self.0
        }

        async fn handle(&self, _message: &InboxMessage) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn lookup_is_keyed_by_event_type() {
        let registry = HandlerRegistry::new();
        registry.register(Arc::new(Named("a.created")));
        registry.register(Arc::new(Named("b.created")));

        assert_eq!(registry.len(), 2);
        assert!(registry.get("a.created").is_some());
        assert!(registry.get("c.created").is_none());
    }

    #[test]
    fn re_registration_replaces_and_returns_previous() {
        let registry = HandlerRegistry::new();
        assert!(registry.register(Arc::new(Named("a.created"))).is_none());
        let previous = registry.register(Arc::new(Named("a.created")));
        assert!(previous.is_some());
        assert_eq!(registry.len(), 1);
    }
}

//! End-to-end relay/dispatcher scenarios against the real schema.

use std::sync::Arc;

use async_trait::async_trait;
use relaybox::{
    AdmitOutcome, Cleanup, CleanupScope, DispatcherConfig, EventHandler, HandlerError,
    HandlerRegistry, InboxAdmitter, InboxDispatcher, InboxMessage, NewInboxMessage, OutboxRelay,
    OutboxStore, PgMessageStore, RelayConfig,
};
use test_utils::db_test;
use uuid::Uuid;

use crate::support::{age_outbox_publication, inbox_status, outbox_status, seed_event, StubTransport};

fn relay(store: &PgMessageStore, transport: Arc<StubTransport>) -> OutboxRelay<PgMessageStore> {
    OutboxRelay::new(store.clone(), transport, RelayConfig::default())
}

db_test!(relay_happy_path_publishes_row, |pool| {
    let store = PgMessageStore::new(pool.clone());
    let row = seed_event(&store, "svc-a").await?;
    let transport = Arc::new(StubTransport::default());

    let stats = relay(&store, transport.clone()).process_all(10).await?;

    assert_eq!(stats.published, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.skipped, 0);
    assert_eq!(outbox_status(pool, row.id).await?, "published");
    assert_eq!(transport.published(), vec![row.message_id]);

    let stored = OutboxStore::get(&store, row.message_id).await?.unwrap();
    assert!(stored.published_at.is_some());
    assert_eq!(stored.retry_count, 0);
    Ok(())
});

db_test!(relay_failure_then_explicit_retry, |pool| {
    let store = PgMessageStore::new(pool.clone());
    let row = seed_event(&store, "svc-a").await?;
    let transport = Arc::new(StubTransport::failing(500));
    let relay = relay(&store, transport.clone());

    let stats = relay.process_all(10).await?;
    assert_eq!(stats.failed, 1);

    let stored = OutboxStore::get(&store, row.message_id).await?.unwrap();
    assert_eq!(stored.retry_count, 1);
    assert!(stored.last_error.as_deref().unwrap().contains("500"));

    // Failed rows are invisible to the normal pass.
    let stats = relay.process_all(10).await?;
    assert_eq!(stats.published + stats.failed + stats.skipped, 0);

    transport.heal();
    let stats = relay.retry_failed(10).await?;
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(outbox_status(pool, row.id).await?, "published");
    Ok(())
});

db_test!(concurrent_relays_publish_once, |pool| {
    let store = PgMessageStore::new(pool.clone());
    let row = seed_event(&store, "svc-a").await?;
    let transport = Arc::new(StubTransport::default());

    let a = relay(&store, transport.clone());
    let b = relay(&store, transport.clone());
    let (ra, rb) = tokio::join!(a.process_all(10), b.process_all(10));
    let (ra, rb) = (ra?, rb?);

    // Exactly one relay won the claim; the transport saw the row once.
    assert_eq!(ra.published + rb.published, 1);
    assert_eq!(ra.failed + rb.failed, 0);
    assert_eq!(transport.published(), vec![row.message_id]);
    assert_eq!(outbox_status(pool, row.id).await?, "published");
    Ok(())
});

struct RecordingHandler {
    event_type: &'static str,
    seen: std::sync::Mutex<Vec<Uuid>>,
}

impl RecordingHandler {
    fn new(event_type: &'static str) -> Arc<Self> {
        Arc::new(Self {
            event_type,
            seen: std::sync::Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn event_type(&self) -> &str {
        self.event_type
    }

    async fn handle(&self, message: &InboxMessage) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(message.message_id);
        Ok(())
    }
}

db_test!(dispatcher_leaves_unhandled_rows_pending, |pool| {
    let store = PgMessageStore::new(pool.clone());
    let admitter = InboxAdmitter::new(store.clone());

    let outcome = admitter
        .admit(NewInboxMessage::new(
            Uuid::now_v7(),
            "svc-remote",
            "inventory.depleted",
            serde_json::json!({"sku": "x"}),
        ))
        .await?;
    let AdmitOutcome::Admitted(row) = outcome else {
        anyhow::bail!("expected admission");
    };

    let registry = Arc::new(HandlerRegistry::new());
    let dispatcher =
        InboxDispatcher::new(store.clone(), registry.clone(), DispatcherConfig::default());

    let stats = dispatcher.process_all(10).await?;
    assert_eq!(stats.no_handler, 1);
    assert_eq!(stats.processed, 0);
    assert_eq!(inbox_status(pool, row.id).await?, "pending");

    // Deploy the handler, re-run the pass.
    let handler = RecordingHandler::new("inventory.depleted");
    registry.register(handler.clone());
    let stats = dispatcher.process_all(10).await?;
    assert_eq!(stats.processed, 1);
    assert_eq!(inbox_status(pool, row.id).await?, "processed");
    assert_eq!(handler.seen.lock().unwrap().len(), 1);
    Ok(())
});

db_test!(duplicate_admission_is_reported_not_written, |pool| {
    let store = PgMessageStore::new(pool.clone());
    let admitter = InboxAdmitter::new(store.clone());
    let id = Uuid::now_v7();

    let first = admitter
        .admit(NewInboxMessage::new(id, "svc-a", "e", serde_json::json!({"v": 1})))
        .await?;
    assert!(matches!(first, AdmitOutcome::Admitted(_)));

    let second = admitter
        .admit(NewInboxMessage::new(id, "svc-a", "e", serde_json::json!({"v": 2})))
        .await?;
    assert!(second.is_duplicate());

    let payload: serde_json::Value =
        sqlx::query_scalar("SELECT payload FROM inbox_messages WHERE message_id = $1")
            .bind(id)
            .fetch_one(pool)
            .await?;
    assert_eq!(payload, serde_json::json!({"v": 1}));
    Ok(())
});

db_test!(cleanup_purges_old_published_only, |pool| {
    let store = PgMessageStore::new(pool.clone());
    let transport = Arc::new(StubTransport::default());
    let relay = relay(&store, transport);

    let old = seed_event(&store, "svc-a").await?;
    let fresh = seed_event(&store, "svc-a").await?;
    relay.process_all(10).await?;
    age_outbox_publication(pool, old.id, 45).await?;

    // A failed row, however old, must survive.
    let failed = seed_event(&store, "svc-a").await?;
    OutboxStore::claim(&store, failed.id).await?;
    OutboxStore::mark_failed(&store, failed.id, "down").await?;
    age_outbox_publication(pool, failed.id, 45).await?;

    let deleted = Cleanup::new(store.clone())
        .purge(CleanupScope::Both, 30)
        .await?;
    assert_eq!(deleted, 1);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_messages")
        .fetch_one(pool)
        .await?;
    assert_eq!(remaining, 2);
    assert_eq!(outbox_status(pool, fresh.id).await?, "published");
    assert_eq!(outbox_status(pool, failed.id).await?, "failed");
    Ok(())
});

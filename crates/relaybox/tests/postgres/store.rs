//! Integration tests for PgMessageStore.

use std::time::Duration;

use relaybox::{
    AdmitOutcome, InboxStore, NewInboxMessage, NewOutboxMessage, OutboxStatus, OutboxStore,
    PgMessageStore,
};
use test_utils::db_test;
use uuid::Uuid;

use crate::support::{age_outbox_claim, outbox_status, seed_event};

db_test!(insert_round_trips_payload_and_headers, |pool| {
    let store = PgMessageStore::new(pool.clone());

    let row = store
        .insert(
            NewOutboxMessage::new(
                "svc-a",
                "order.created",
                serde_json::json!({"nested": {"k": 1}, "list": [1, 2]}),
                "order",
                "o-1",
            )
            .topic("orders")
            .header("X-Tenant", "acme"),
        )
        .await?;

    assert_eq!(row.status, OutboxStatus::Pending);
    assert_eq!(row.retry_count, 0);
    assert!(row.processes_at.is_none());

    let fetched = OutboxStore::get(&store, row.message_id).await?.unwrap();
    assert_eq!(fetched.payload, serde_json::json!({"nested": {"k": 1}, "list": [1, 2]}));
    assert_eq!(fetched.headers.get("X-Tenant").map(String::as_str), Some("acme"));
    assert_eq!(fetched.destination_topic.as_deref(), Some("orders"));
    Ok(())
});

db_test!(claim_transitions_and_misses, |pool| {
    let store = PgMessageStore::new(pool.clone());
    let row = seed_event(&store, "svc-a").await?;

    let claimed = OutboxStore::claim(&store, row.id).await?.unwrap();
    assert_eq!(claimed.status, OutboxStatus::Processing);
    assert!(claimed.processes_at.is_some());

    // Second claim is a miss, not an error.
    assert!(OutboxStore::claim(&store, row.id).await?.is_none());
    Ok(())
});

db_test!(concurrent_claims_yield_one_owner, |pool| {
    let store = PgMessageStore::new(pool.clone());
    let row = seed_event(&store, "svc-a").await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let id = row.id;
        handles.push(tokio::spawn(async move {
            OutboxStore::claim(&store, id).await.unwrap().is_some()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await? {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(outbox_status(pool, row.id).await?, "processing");
    Ok(())
});

db_test!(concurrent_admissions_yield_one_row, |pool| {
    let store = PgMessageStore::new(pool.clone());
    let message_id = Uuid::now_v7();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let outcome = store
                .admit(NewInboxMessage::new(
                    message_id,
                    "svc-remote",
                    "order.created",
                    serde_json::json!({"k": 1}),
                ))
                .await
                .unwrap();
            matches!(outcome, AdmitOutcome::Admitted(_))
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await? {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM inbox_messages WHERE message_id = $1")
            .bind(message_id)
            .fetch_one(pool)
            .await?;
    assert_eq!(count, 1);
    Ok(())
});

db_test!(mark_failed_requires_processing, |pool| {
    let store = PgMessageStore::new(pool.clone());
    let row = seed_event(&store, "svc-a").await?;

    // Not claimed yet: the guarded UPDATE must not fire.
    assert!(!OutboxStore::mark_failed(&store, row.id, "boom").await?);
    assert_eq!(outbox_status(pool, row.id).await?, "pending");

    OutboxStore::claim(&store, row.id).await?;
    assert!(OutboxStore::mark_failed(&store, row.id, "boom").await?);
    assert_eq!(outbox_status(pool, row.id).await?, "failed");

    // Terminal/failed rows ignore publish marks.
    assert!(!OutboxStore::mark_published(&store, row.id).await?);
    Ok(())
});

db_test!(release_stuck_resets_stale_claims_only, |pool| {
    let store = PgMessageStore::new(pool.clone());
    let stale = seed_event(&store, "svc-a").await?;
    let fresh = seed_event(&store, "svc-a").await?;

    OutboxStore::claim(&store, stale.id).await?;
    OutboxStore::claim(&store, fresh.id).await?;
    age_outbox_claim(pool, stale.id).await?;

    let released = OutboxStore::release_stuck(&store, Duration::from_secs(600)).await?;
    assert_eq!(released, 1);
    assert_eq!(outbox_status(pool, stale.id).await?, "pending");
    assert_eq!(outbox_status(pool, fresh.id).await?, "processing");

    // The reset did not cost the row a retry.
    let row = OutboxStore::get(&store, stale.message_id).await?.unwrap();
    assert_eq!(row.retry_count, 0);
    Ok(())
});

db_test!(fetch_pending_orders_oldest_first, |pool| {
    let store = PgMessageStore::new(pool.clone());
    let first = seed_event(&store, "svc-a").await?;
    let second = seed_event(&store, "svc-b").await?;
    let third = seed_event(&store, "svc-a").await?;

    let all = OutboxStore::fetch_pending(&store, None, 10, 5).await?;
    assert_eq!(
        all.iter().map(|m| m.id).collect::<Vec<_>>(),
        vec![first.id, second.id, third.id]
    );

    let only_a = OutboxStore::fetch_pending(&store, Some("svc-a"), 10, 5).await?;
    assert_eq!(only_a.len(), 2);

    let limited = OutboxStore::fetch_pending(&store, None, 1, 5).await?;
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, first.id);
    Ok(())
});

//! Integration tests for the transactional producer.

use futures::future::BoxFuture;
use relaybox::{Error, NewOutboxMessage, OutboxProducer};
use sqlx::{PgPool, Postgres, Transaction};
use test_utils::db_test;
use uuid::Uuid;

async fn create_orders_table(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("CREATE TABLE orders (id BIGSERIAL PRIMARY KEY, customer TEXT NOT NULL)")
        .execute(pool)
        .await?;
    Ok(())
}

async fn count(pool: &PgPool, table: &str) -> anyhow::Result<i64> {
    let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?;
    Ok(n)
}

fn event(aggregate_id: &str) -> NewOutboxMessage {
    NewOutboxMessage::new(
        "billing",
        "order.created",
        serde_json::json!({"customer": "acme"}),
        "order",
        aggregate_id,
    )
}

fn insert_order<'a>(tx: &'a mut Transaction<'static, Postgres>) -> BoxFuture<'a, Result<i64, Error>> {
    Box::pin(async move {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO orders (customer) VALUES ('acme') RETURNING id")
                .fetch_one(&mut **tx)
                .await?;
        Ok(id)
    })
}

/// Business callback that writes first, then fails the unit.
fn insert_order_then_fail<'a>(
    tx: &'a mut Transaction<'static, Postgres>,
) -> BoxFuture<'a, Result<i64, Error>> {
    Box::pin(async move {
        sqlx::query("INSERT INTO orders (customer) VALUES ('acme')")
            .execute(&mut **tx)
            .await?;
        Err(Error::Config("business rule violated".into()))
    })
}

db_test!(business_write_and_append_commit_together, |pool| {
    create_orders_table(pool).await?;
    let producer = OutboxProducer::new(pool.clone());

    let order_id: i64 = producer
        .execute_and_append(insert_order, event("pending"))
        .await?;

    assert!(order_id > 0);
    assert_eq!(count(pool, "orders").await?, 1);
    assert_eq!(count(pool, "outbox_messages").await?, 1);
    Ok(())
});

db_test!(business_failure_rolls_back_everything, |pool| {
    create_orders_table(pool).await?;
    let producer = OutboxProducer::new(pool.clone());

    let result: Result<i64, Error> = producer
        .execute_and_append(insert_order_then_fail, event("pending"))
        .await;

    // The caller observes the original error …
    let err = result.unwrap_err();
    assert!(matches!(&err, Error::Config(msg) if msg.contains("business rule")));

    // … and neither half of the unit is visible.
    assert_eq!(count(pool, "orders").await?, 0);
    assert_eq!(count(pool, "outbox_messages").await?, 0);
    Ok(())
});

db_test!(append_failure_rolls_back_business_state, |pool| {
    create_orders_table(pool).await?;
    let producer = OutboxProducer::new(pool.clone());

    // Two events sharing an explicit message_id: the second append violates
    // the UNIQUE constraint.
    let duplicate = Uuid::now_v7();
    let result: Result<i64, Error> = producer
        .execute_and_append_many(
            insert_order,
            vec![
                event("a").message_id(duplicate),
                event("b").message_id(duplicate),
            ],
        )
        .await;

    assert!(result.is_err());
    assert_eq!(count(pool, "orders").await?, 0);
    assert_eq!(count(pool, "outbox_messages").await?, 0);
    Ok(())
});

db_test!(append_many_commits_all_rows, |pool| {
    create_orders_table(pool).await?;
    let producer = OutboxProducer::new(pool.clone());

    producer
        .execute_and_append_many(insert_order, vec![event("a"), event("b"), event("c")])
        .await?;

    assert_eq!(count(pool, "orders").await?, 1);
    assert_eq!(count(pool, "outbox_messages").await?, 3);
    Ok(())
});

db_test!(append_runs_in_the_caller_transaction, |pool| {
    let mut tx = pool.begin().await?;
    OutboxProducer::append(&mut tx, event("a")).await?;
    tx.rollback().await?;

    assert_eq!(count(pool, "outbox_messages").await?, 0);

    let mut tx = pool.begin().await?;
    let row = OutboxProducer::append(&mut tx, event("a")).await?;
    tx.commit().await?;

    assert_eq!(count(pool, "outbox_messages").await?, 1);
    assert!(!row.message_id.is_nil());
    Ok(())
});

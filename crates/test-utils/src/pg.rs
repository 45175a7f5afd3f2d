//! Postgres test harness: one throwaway database per test.
//!
//! [`run_db_test`] owns the whole lifecycle: it decides whether database
//! tests can run at all (skipping with a note when they can't, so a bare
//! checkout stays green), creates a database named after the test, applies
//! the relaybox migrations, runs the test body, and drops the database
//! again unless the body failed or `TEST_KEEP_DB` asks for it to stick
//! around. A panic inside the body skips cleanup too, which is what you
//! want when debugging.
//!
//! Point `TEST_ADMIN_DATABASE_URL` (env or `.env`) at a role that may
//! CREATE/DROP DATABASE, e.g. `postgres://postgres@localhost/postgres`.

use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use url::Url;
use uuid::Uuid;

const ADMIN_URL_VAR: &str = "TEST_ADMIN_DATABASE_URL";
const KEEP_VAR: &str = "TEST_KEEP_DB";

/// Run one database-backed test body against a database created for it
/// alone.
///
/// Prefer the [`db_test!`](crate::db_test) macro over calling this
/// directly.
pub async fn run_db_test<F>(test_name: &str, body: F) -> Result<()>
where
    F: for<'a> FnOnce(&'a PgPool) -> Pin<Box<dyn Future<Output = Result<()>> + 'a>>,
{
    dotenvy::dotenv().ok();
    let Ok(admin_url) = std::env::var(ADMIN_URL_VAR) else {
        eprintln!("skipping {test_name}: {ADMIN_URL_VAR} not set");
        return Ok(());
    };

    let db_name = database_name(test_name);
    let mut admin = PgConnection::connect(&admin_url).await?;
    admin
        .execute(format!(r#"CREATE DATABASE "{db_name}""#).as_str())
        .await?;

    let mut db_url = Url::parse(&admin_url)?;
    db_url.set_path(&db_name);

    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(db_url.as_str())
        .await?;
    sqlx::migrate!("../relaybox/migrations").run(&pool).await?;

    let outcome = body(&pool).await;
    pool.close().await;

    if outcome.is_err() || std::env::var(KEEP_VAR).is_ok() {
        eprintln!("database {db_name} kept for inspection");
    } else if let Err(e) = admin
        .execute(format!(r#"DROP DATABASE IF EXISTS "{db_name}" WITH (FORCE)"#).as_str())
        .await
    {
        eprintln!("could not drop database {db_name}: {e}");
    }

    outcome
}

/// Database name for a test: a sanitized slug of the test name plus a
/// UUID v7 suffix, sized to fit Postgres's 63-byte identifier limit.
///
/// The time-ordered suffix keeps sibling test databases listed in
/// creation order, which helps when several are kept for inspection.
fn database_name(test_name: &str) -> String {
    let mut slug: String = test_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    slug.truncate(20);
    format!("relaybox_{slug}_{}", Uuid::now_v7().simple())
}

/// Define a database-backed async test.
///
/// ```ignore
/// use test_utils::db_test;
///
/// db_test!(claim_is_exclusive, |pool| {
///     // `pool` is a &PgPool for this test's own database
///     sqlx::query("SELECT 1").execute(pool).await?;
///     Ok(())
/// });
/// ```
///
/// Expands to a `#[tokio::test]` whose body runs through
/// [`run_db_test`](crate::pg::run_db_test), inheriting its skip and
/// cleanup behavior.
#[macro_export]
macro_rules! db_test {
    ($name:ident, |$pool:ident| $body:block) => {
        #[tokio::test(flavor = "multi_thread")]
        async fn $name() -> anyhow::Result<()> {
            $crate::pg::run_db_test(stringify!($name), |$pool| {
                Box::pin(async move { $body })
            })
            .await
        }
    };
}

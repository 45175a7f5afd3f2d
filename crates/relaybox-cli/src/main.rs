//! Operational CLI for the relaybox outbox/inbox pipeline.
//!
//! Intended to be invoked from cron (or any external scheduler); one
//! invocation is one batch pass. Rows that fail stay queryable in the
//! store (`status = 'failed'`), so the commands exit zero even when some
//! rows failed — a non-zero exit means invalid options, bad configuration,
//! or an unreachable database.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use relaybox::{
    Cleanup, CleanupScope, HandlerRegistry, HttpTransport, InboxDispatcher, OutboxRelay,
    PgMessageStore, RelayboxConfig,
};

/// Relaybox message pipeline commands.
#[derive(Parser)]
#[command(name = "relaybox")]
#[command(about = "Process, retry and clean up transactional outbox/inbox messages")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "relaybox.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Apply pending database migrations before running the command.
    #[arg(long, global = true)]
    migrate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish pending outbox messages through the configured transport.
    #[command(name = "outbox:process")]
    OutboxProcess {
        /// Restrict the pass to one destination service.
        #[arg(long)]
        service: Option<String>,
        /// Batch size; 0 uses processing.batch_size from the config.
        #[arg(long, default_value_t = 0)]
        limit: u32,
        /// Re-drive failed rows instead of processing pending ones.
        #[arg(long)]
        retry: bool,
    },

    /// Dispatch pending inbox messages to registered handlers.
    ///
    /// The CLI wires no handlers itself — handler registration is
    /// application code — so a plain pass reports `no_handler` counts.
    #[command(name = "inbox:process")]
    InboxProcess {
        /// Batch size; 0 uses processing.batch_size from the config.
        #[arg(long, default_value_t = 0)]
        limit: u32,
        /// Re-drive failed rows instead of processing pending ones.
        #[arg(long)]
        retry: bool,
    },

    /// Delete published/processed messages older than the retention window.
    #[command(name = "messages:cleanup")]
    MessagesCleanup {
        /// Retention window in days.
        #[arg(long, default_value_t = 30)]
        days: u32,
        /// Which tables to clean: outbox, inbox or both.
        #[arg(long = "type", default_value = "both")]
        scope: CleanupScope,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: &PathBuf) -> anyhow::Result<RelayboxConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config file {}", path.display()))?;
    let config: RelayboxConfig =
        toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = load_config(&cli.config)?;

    let database_url = std::env::var("DATABASE_URL")
        .ok()
        .or_else(|| config.database_url.clone())
        .context("no database URL: set DATABASE_URL or database_url in the config file")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("connect to database")?;

    if cli.migrate {
        sqlx::migrate!("../relaybox/migrations")
            .run(&pool)
            .await
            .context("apply migrations")?;
    }

    let store = PgMessageStore::new(pool);

    match cli.command {
        Commands::OutboxProcess {
            service,
            limit,
            retry,
        } => {
            let transport = Arc::new(HttpTransport::new(config.http_transport_config())?);
            let relay = OutboxRelay::new(store, transport, config.relay_config());
            if retry {
                let stats = relay.retry_failed(limit).await?;
                println!("Retried: {}  Failed: {}", stats.retried, stats.failed);
            } else {
                let stats = match service {
                    Some(service) => relay.process_for_destination(&service, limit).await?,
                    None => relay.process_all(limit).await?,
                };
                println!(
                    "Published: {}  Failed: {}  Skipped: {}",
                    stats.published, stats.failed, stats.skipped
                );
            }
        }

        Commands::InboxProcess { limit, retry } => {
            let registry = Arc::new(HandlerRegistry::new());
            let dispatcher = InboxDispatcher::new(store, registry, config.dispatcher_config());
            if retry {
                let stats = dispatcher.retry_failed(limit).await?;
                println!("Retried: {}  Failed: {}", stats.retried, stats.failed);
            } else {
                let stats = dispatcher.process_all(limit).await?;
                println!(
                    "Processed: {}  Failed: {}  No handler: {}",
                    stats.processed, stats.failed, stats.no_handler
                );
            }
        }

        Commands::MessagesCleanup { days, scope } => {
            let deleted = Cleanup::new(store).purge(scope, days).await?;
            println!("Deleted: {deleted}");
        }
    }

    Ok(())
}

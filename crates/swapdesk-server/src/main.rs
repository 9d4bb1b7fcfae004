mod config;
mod console;

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::info;

use swapdesk_bot::{Dispatcher, Localizer, SessionCache, spawn_sweeper};
use swapdesk_db::Database;

use crate::config::Config;
use crate::console::{ConsoleTransport, read_events};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout carries the outbound JSON lines.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "swapdesk=debug,swapdesk_bot=debug,swapdesk_db=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    db.seed_assets(&config.assets)?;
    db.purge_orphans()?;

    let sweeper = spawn_sweeper(db.clone(), config.sweep_interval);

    let dispatcher = Dispatcher::new(
        db,
        ConsoleTransport::stdout(config.console_admins.clone()),
        Localizer::new(config.default_language),
        SessionCache::new(config.session_capacity, config.session_ttl),
    );

    info!("swapdesk reading events from stdin");
    let mut in_flight = JoinSet::new();
    read_events(tokio::io::stdin(), |event| {
        while in_flight.try_join_next().is_some() {}
        let dispatcher = dispatcher.clone();
        in_flight.spawn(async move { dispatcher.dispatch(event).await });
    })
    .await?;

    info!("Input closed, finishing {} events", in_flight.len());
    while in_flight.join_next().await.is_some() {}
    sweeper.abort();
    Ok(())
}

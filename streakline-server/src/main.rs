//! Streakline server.
//!
//! Polls GitHub and NFT-marketplace activity feeds, persists every event
//! exactly once, delivers notifications at-least-once, and folds the
//! committed stream into streaks, achievements and listing state.

mod config;
mod notifier;
mod shutdown;
mod wiring;

use clap::Parser;
use config::{get_database_url, load_config};
use notifier::DiscordWebhookNotifier;
use shutdown::{shutdown_signal, spawn_config_reload_handler};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use streakline_core::config::ConfigStore;
use streakline_core::events::{EventSenders, ingest_tick_channel, poll_delay_hint_channel};
use streakline_core::framework::DatabaseProcessor;
use streakline_core::processors::{
    DeliveryPipeline, DeliveryRunner, MarketTracker, MarketTrackerRunner, PollScheduler,
    PollSchedulerConfig, StatsEngine, StatsEngineRunner,
};
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use wiring::{PipelineDeps, spawn_all_sources};

/// Streakline - activity feed aggregator with streaks and achievements
#[derive(Parser, Debug)]
#[command(name = "streakline-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./streakline-config.toml")]
    config: PathBuf,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting streakline-server v{}", env!("CARGO_PKG_VERSION"));

    let file_config = load_config(&args.config).map_err(|e| {
        tracing::error!("Failed to load configuration: {e:#}");
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {e}");
            e
        })?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {e}");
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let store = Arc::new(DatabaseProcessor::new(db_pool.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // One ingest channel per downstream consumer; every poller fans out to
    // all three.
    let (delivery_ingest_tx, delivery_ingest_rx) = ingest_tick_channel();
    let (stats_ingest_tx, stats_ingest_rx) = ingest_tick_channel();
    let (market_ingest_tx, market_ingest_rx) = ingest_tick_channel();
    let (delay_hint_tx, delay_hint_rx) = poll_delay_hint_channel();
    let senders = EventSenders::new(
        vec![delivery_ingest_tx, stats_ingest_tx, market_ingest_tx],
        delay_hint_tx,
    );

    let deps = PipelineDeps {
        store: store.clone(),
        senders,
        shutdown_rx: shutdown_rx.clone(),
    };

    // Feed pollers, one per source.
    let sources = spawn_all_sources(&deps, &file_config);
    tracing::info!("Spawned {} feed pollers", sources.len());

    // Scheduler.
    let scheduler_config = ConfigStore::new(PollSchedulerConfig {
        sources: sources.clone(),
    });
    let scheduler_watcher = scheduler_config.subscribe();
    let scheduler_handle = tokio::spawn(PollScheduler::new().run(
        shutdown_rx.clone(),
        delay_hint_rx,
        scheduler_config.clone(),
        scheduler_watcher,
    ));

    // Delivery pipeline.
    let notifier = Arc::new(DiscordWebhookNotifier::new(
        file_config.delivery.webhook_url.clone(),
    ));
    let delivery_handle = tokio::spawn(
        DeliveryRunner::new(
            DeliveryPipeline::new(
                store.clone(),
                notifier,
                file_config.delivery.tuning.clone(),
            ),
            delivery_ingest_rx,
            shutdown_rx.clone(),
        )
        .run(),
    );

    // Stats engine.
    let stats_handle = tokio::spawn(
        StatsEngineRunner::new(
            StatsEngine::new(store.clone(), file_config.stats.clone()),
            stats_ingest_rx,
            shutdown_rx.clone(),
        )
        .run(),
    );

    // Market tracker.
    let market_handle = tokio::spawn(
        MarketTrackerRunner::new(
            MarketTracker::new(store.clone()),
            market_ingest_rx,
            shutdown_rx.clone(),
        )
        .run(),
    );

    // SIGHUP reloads the source list.
    let reload_notify =
        spawn_config_reload_handler(args.config.clone(), deps, scheduler_config, sources);

    shutdown_signal().await;

    tracing::info!("Shutting down...");
    let _ = shutdown_tx.send(true);
    reload_notify.notify_one();

    let _ = tokio::join!(
        scheduler_handle,
        delivery_handle,
        stats_handle,
        market_handle
    );

    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,reqwest=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

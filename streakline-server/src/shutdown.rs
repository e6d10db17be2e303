//! Signal handling for graceful shutdown and config reload.

use crate::config::load_config;
use crate::wiring::PipelineDeps;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use streakline_core::config::ConfigStore;
use streakline_core::feeds::SourceId;
use streakline_core::processors::PollSchedulerConfig;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;

/// Completes when SIGTERM or SIGINT (Ctrl+C) is received.
pub async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

/// Spawns a task that listens for SIGHUP and reloads the source list.
///
/// Added sources get a fresh poller; removed sources lose their tick loop
/// when the scheduler reconciles, which closes the poller's tick channel
/// and lets it drain out. Pollers for unchanged sources are kept as-is.
///
/// Returns a Notify used to stop the handler on shutdown.
pub fn spawn_config_reload_handler(
    config_path: PathBuf,
    deps: PipelineDeps,
    scheduler_config: ConfigStore<PollSchedulerConfig>,
    initial: Vec<streakline_core::processors::ScheduledSource>,
) -> Arc<Notify> {
    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_clone = shutdown_notify.clone();

    tokio::spawn(async move {
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        let mut active: HashMap<SourceId, streakline_core::processors::ScheduledSource> = initial
            .into_iter()
            .map(|s| (s.source.clone(), s))
            .collect();

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading configuration");
                    let config = match load_config(&config_path) {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::error!("Failed to reload configuration: {e:#}");
                            continue;
                        }
                    };

                    let mut desired: HashMap<SourceId, _> = HashMap::new();
                    for user in &config.github.users {
                        let id = SourceId::Github { user: user.clone() };
                        let entry = match active.remove(&id) {
                            Some(existing) => existing,
                            None => crate::wiring::spawn_github_source(&deps, &config.github, user),
                        };
                        desired.insert(id, entry);
                    }
                    for collection in &config.collections {
                        let id = SourceId::Marketplace {
                            venue: streakline_core::feeds::opensea::OpenSeaEventsFeed::VENUE.to_string(),
                            chain: collection.chain.clone(),
                            contract: collection.contract.clone(),
                        };
                        let entry = match active.remove(&id) {
                            Some(existing) => existing,
                            None => crate::wiring::spawn_collection_source(
                                &deps,
                                collection,
                                config.marketplace.opensea_api_key.as_deref(),
                            ),
                        };
                        desired.insert(id, entry);
                    }
                    // Whatever is left in `active` was removed from the
                    // config; dropping its ScheduledSource here drops the
                    // tick sender once the scheduler reconciles.
                    active = desired;

                    scheduler_config
                        .update(PollSchedulerConfig {
                            sources: active.values().cloned().collect(),
                        })
                        .await;
                    tracing::info!("Configuration reloaded, {} sources active", active.len());
                }
                _ = shutdown_notify_clone.notified() => {
                    tracing::debug!("Config reload handler shutting down");
                    break;
                }
            }
        }
    });

    shutdown_notify
}

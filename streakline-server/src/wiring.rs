//! Pipeline assembly.
//!
//! Builds one feed poller per configured source and hands the scheduler
//! the matching tick senders. The same helpers serve startup and SIGHUP
//! reload, so a reload spawns pollers only for sources it actually added.

use crate::config::FileConfig;
use std::sync::Arc;
use std::time::Duration;
use streakline_core::config::{CollectionConfig, GithubSourceConfig};
use streakline_core::events::{EventSenders, poll_tick_channel};
use streakline_core::feeds::opensea::OpenSeaEventsFeed;
use streakline_core::feeds::{SourceFeed, github::GithubEventsFeed};
use streakline_core::framework::DatabaseProcessor;
use streakline_core::processors::{FeedPoller, FeedPollerRunner, ScheduledSource};
use tokio::sync::watch;

/// Everything a new feed poller needs besides its feed.
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<DatabaseProcessor>,
    pub senders: EventSenders,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Spawn a poller for one feed; returns the scheduler entry for it.
fn spawn_feed<F>(deps: &PipelineDeps, feed: F, base_interval: Duration) -> ScheduledSource
where
    F: SourceFeed + 'static,
{
    let source = feed.source_id();
    let (tick_tx, tick_rx) = poll_tick_channel();
    let runner = FeedPollerRunner::new(
        FeedPoller::new(deps.store.clone(), feed),
        tick_rx,
        deps.senders.clone(),
        deps.shutdown_rx.clone(),
    );
    tokio::spawn(runner.run());
    ScheduledSource {
        source,
        base_interval,
        tick_tx,
    }
}

pub fn spawn_github_source(
    deps: &PipelineDeps,
    config: &GithubSourceConfig,
    user: &str,
) -> ScheduledSource {
    let feed = GithubEventsFeed::new(
        user.to_string(),
        config.token.clone(),
        time::Duration::hours(config.lookback_hours as i64),
    );
    spawn_feed(deps, feed, Duration::from_secs(config.poll_interval_secs))
}

pub fn spawn_collection_source(
    deps: &PipelineDeps,
    collection: &CollectionConfig,
    api_key: Option<&str>,
) -> ScheduledSource {
    let feed = OpenSeaEventsFeed::new(
        collection.slug.clone(),
        collection.chain.clone(),
        collection.contract.clone(),
        api_key.map(str::to_string),
    );
    spawn_feed(
        deps,
        feed,
        Duration::from_secs(collection.poll_interval_secs),
    )
}

/// Spawn pollers for every source in `config`.
pub fn spawn_all_sources(deps: &PipelineDeps, config: &FileConfig) -> Vec<ScheduledSource> {
    let mut sources = Vec::new();
    for user in &config.github.users {
        sources.push(spawn_github_source(deps, &config.github, user));
    }
    for collection in &config.collections {
        sources.push(spawn_collection_source(
            deps,
            collection,
            config.marketplace.opensea_api_key.as_deref(),
        ));
    }
    sources
}

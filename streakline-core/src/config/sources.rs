//! Source, delivery and stats configuration.

use crate::entities::achievements::AchievementThresholds;
use serde::Deserialize;

fn default_github_poll_interval_secs() -> u64 {
    120
}

fn default_market_poll_interval_secs() -> u64 {
    300
}

fn default_lookback_hours() -> u64 {
    24
}

/// GitHub timelines to follow.
#[derive(Debug, Clone, Deserialize)]
pub struct GithubSourceConfig {
    /// Users whose public event timelines are polled.
    pub users: Vec<String>,
    /// Personal access token; unauthenticated polling works but rate-limits
    /// much earlier.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_github_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// How far back a first poll reaches when no cursor exists yet.
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u64,
}

/// One NFT collection to track.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    /// Marketplace collection slug.
    pub slug: String,
    pub chain: String,
    pub contract: String,
    #[serde(default = "default_market_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_batch_limit() -> i64 {
    25
}

fn default_max_age_hours() -> u64 {
    12
}

/// Delivery pipeline tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Max undelivered events fetched per kind per cycle.
    pub batch_limit: i64,
    /// Events older than this are abandoned instead of redelivered, so a
    /// long outage does not flood the channel on recovery.
    pub max_age_hours: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            max_age_hours: default_max_age_hours(),
        }
    }
}

impl DeliveryConfig {
    pub fn max_age(&self) -> time::Duration {
        time::Duration::hours(self.max_age_hours as i64)
    }
}

fn default_stats_batch_limit() -> i64 {
    200
}

/// Streak and achievement engine tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Max committed events folded per cycle.
    pub batch_limit: i64,
    pub thresholds: AchievementThresholds,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_stats_batch_limit(),
            thresholds: AchievementThresholds::default(),
        }
    }
}

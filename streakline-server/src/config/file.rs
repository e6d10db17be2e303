//! TOML file configuration structures.
//!
//! These structs directly map to the `streakline-config.toml` file format.

use serde::Deserialize;
use streakline_core::config::{CollectionConfig, DeliveryConfig, GithubSourceConfig, StatsConfig};
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub github: GithubSourceConfig,
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
    pub delivery: DeliveryFileConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub marketplace: MarketplaceConfig,
}

/// Delivery configuration section: the notification webhook plus pipeline
/// tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryFileConfig {
    /// Discord-compatible webhook the activity feed posts to.
    pub webhook_url: Url,
    #[serde(flatten)]
    pub tuning: DeliveryConfig,
}

/// Marketplace API access.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketplaceConfig {
    #[serde(default)]
    pub opensea_api_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[github]
users = ["octocat", "monalisa"]
token = "ghp_test"
poll_interval_secs = 90
lookback_hours = 48

[[collections]]
slug = "cool-cats"
chain = "ethereum"
contract = "0x1234567890abcdef"
poll_interval_secs = 600

[delivery]
webhook_url = "https://discord.com/api/webhooks/1/abc"
batch_limit = 10
max_age_hours = 6

[stats]
batch_limit = 100

[stats.thresholds]
daily_dozen = 10

[marketplace]
opensea_api_key = "os-key"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.github.users.len(), 2);
        assert_eq!(config.github.poll_interval_secs, 90);
        assert_eq!(config.collections.len(), 1);
        assert_eq!(config.collections[0].slug, "cool-cats");
        assert_eq!(config.delivery.tuning.batch_limit, 10);
        assert_eq!(config.delivery.tuning.max_age_hours, 6);
        assert_eq!(config.stats.thresholds.daily_dozen, 10);
        assert_eq!(config.marketplace.opensea_api_key.as_deref(), Some("os-key"));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let toml_str = r#"
[github]
users = ["octocat"]

[delivery]
webhook_url = "https://discord.com/api/webhooks/1/abc"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.github.poll_interval_secs, 120);
        assert_eq!(config.github.lookback_hours, 24);
        assert!(config.collections.is_empty());
        assert_eq!(config.delivery.tuning.batch_limit, 25);
        assert_eq!(config.delivery.tuning.max_age_hours, 12);
        assert_eq!(config.stats.thresholds.night_owl, 3);
        assert!(config.marketplace.opensea_api_key.is_none());
    }
}

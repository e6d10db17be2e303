//! Runtime configuration.

pub mod config_store;
pub mod sources;

pub use config_store::{ConfigStore, ConfigWatcher};
pub use sources::{CollectionConfig, DeliveryConfig, GithubSourceConfig, StatsConfig};

//! Server configuration loading.

mod file;

pub use file::FileConfig;

use anyhow::Context;
use std::path::Path;

/// Load and parse the TOML configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// The database URL comes from the environment, never the config file.
pub fn get_database_url() -> anyhow::Result<String> {
    std::env::var("DATABASE_URL").context("DATABASE_URL environment variable not set")
}

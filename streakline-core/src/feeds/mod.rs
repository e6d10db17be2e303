//! Source feeds.
//!
//! A feed turns one upstream API into normalized [`NewActivityEvent`]s.
//! Feeds are stateless between cycles: the poller hands them the stored
//! cursor position and persists whatever position they report back, so a
//! crashed cycle is simply re-fetched and deduplicated by the store.

pub mod github;
pub mod opensea;

use crate::entities::activity_event::NewActivityEvent;
use crate::entities::feed_cursor::FeedPosition;
use async_trait::async_trait;
use thiserror::Error;

/// Identity of a polled source. Doubles as the cursor key, so the `Display`
/// form must be stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceId {
    /// One GitHub user's public event timeline.
    Github { user: String },
    /// One NFT collection on one marketplace.
    Marketplace {
        venue: String,
        chain: String,
        contract: String,
    },
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceId::Github { user } => write!(f, "github:{user}"),
            SourceId::Marketplace {
                venue,
                chain,
                contract,
            } => write!(f, "market:{venue}:{chain}/{contract}"),
        }
    }
}

/// One fetched batch: normalized events plus the position the cursor should
/// advance to once the batch is persisted.
#[derive(Debug, Default)]
pub struct FeedBatch {
    pub events: Vec<NewActivityEvent>,
    pub next_position: Option<FeedPosition>,
}

/// Errors a feed cycle can fail with.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("API request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("rate limit exceeded, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("API error: {message}")]
    Api { message: String },
}

/// Trait for source feed implementations.
///
/// Malformed individual records are skipped inside `fetch_since` with a
/// warning; only transport-level and API-level failures surface as errors.
#[async_trait]
pub trait SourceFeed: Send + Sync {
    fn source_id(&self) -> SourceId;

    /// Fetch everything newer than `position` (or a bounded lookback when
    /// the source has never been polled), normalized and ready to persist.
    async fn fetch_since(&self, position: Option<&FeedPosition>) -> Result<FeedBatch, FeedError>;
}

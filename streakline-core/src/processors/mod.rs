//! Long-running processors.
//!
//! Each processor owns a `run` loop driven by channel events, with `biased`
//! shutdown handling. See the `events` module for the flow between them.

pub mod delivery;
pub mod feed_poller;
pub mod market_tracker;
pub mod poll_scheduler;
pub mod stats_engine;

pub use delivery::{DeliveryPipeline, DeliveryRunner, Notifier, NotifyError};
pub use feed_poller::{FeedPoller, FeedPollerRunner, IngestError};
pub use market_tracker::{MARKET_CONSUMER, MarketTracker, MarketTrackerRunner};
pub use poll_scheduler::{PollScheduler, PollSchedulerConfig, ScheduledSource};
pub use stats_engine::{STATS_CONSUMER, StatsEngine, StatsEngineRunner};

//! Inter-processor event system.
//!
//! # Event flow
//!
//! 1. `PollScheduler` emits `PollTick` -> `FeedPoller`
//! 2. `FeedPoller` persists a batch, then emits `IngestTick` ->
//!    `DeliveryPipeline`, `StatsEngine` and `MarketTracker`
//! 3. `FeedPoller` emits `PollDelayHint` -> `PollScheduler` after failed
//!    cycles so the schedule backs off
//!
//! All events are idempotent and ephemeral: they carry identifiers and
//! counters rather than data, and every consumer re-reads current state
//! from the store.

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, EventSenders, IngestTickReceiver, IngestTickSender,
    PollDelayHintReceiver, PollDelayHintSender, PollTickReceiver, PollTickSender,
    ingest_tick_channel, poll_delay_hint_channel, poll_tick_channel,
};
pub use types::{IngestTick, PollDelayHint, PollTick};

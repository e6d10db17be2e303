//! Event channel factories and handles.

use super::types::{IngestTick, PollDelayHint, PollTick};
use tokio::sync::mpsc;

/// Default buffer size for event channels.
///
/// Enough to absorb bursts while keeping memory bounded.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for PollTick events.
pub type PollTickSender = mpsc::Sender<PollTick>;
/// Receiver handle for PollTick events.
pub type PollTickReceiver = mpsc::Receiver<PollTick>;

/// Sender handle for IngestTick events.
pub type IngestTickSender = mpsc::Sender<IngestTick>;
/// Receiver handle for IngestTick events.
pub type IngestTickReceiver = mpsc::Receiver<IngestTick>;

/// Sender handle for PollDelayHint events.
pub type PollDelayHintSender = mpsc::Sender<PollDelayHint>;
/// Receiver handle for PollDelayHint events.
pub type PollDelayHintReceiver = mpsc::Receiver<PollDelayHint>;

/// Create a new PollTick channel. Each feed poller owns its own channel.
pub fn poll_tick_channel() -> (PollTickSender, PollTickReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new IngestTick channel, one per downstream consumer.
pub fn ingest_tick_channel() -> (IngestTickSender, IngestTickReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new PollDelayHint channel.
pub fn poll_delay_hint_channel() -> (PollDelayHintSender, PollDelayHintReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Handles a feed poller needs to reach downstream consumers.
///
/// `ingest` fans an `IngestTick` out to every registered consumer
/// (delivery, stats, market tracker).
#[derive(Clone)]
pub struct EventSenders {
    pub ingest: Vec<IngestTickSender>,
    pub delay_hint: PollDelayHintSender,
}

impl EventSenders {
    pub fn new(ingest: Vec<IngestTickSender>, delay_hint: PollDelayHintSender) -> Self {
        Self { ingest, delay_hint }
    }

    /// Fan an ingest tick out to every consumer; a closed receiver is
    /// skipped, not fatal.
    pub async fn broadcast_ingest(&self, tick: super::IngestTick) {
        for sender in &self.ingest {
            let _ = sender.send(tick.clone()).await;
        }
    }
}

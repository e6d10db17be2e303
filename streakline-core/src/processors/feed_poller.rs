//! FeedPoller processor.
//!
//! One FeedPoller instance exists per configured source. Each poll cycle:
//! - reads the stored cursor
//! - fetches everything newer from the source feed
//! - drops records that fail validation (logged, never fatal)
//! - persists the batch (the store deduplicates)
//! - advances the cursor, only after the batch is durable
//! - fans an `IngestTick` out to the downstream consumers
//!
//! Failed cycles feed a `PollDelayHint` back to the scheduler so the
//! source's interval stretches; the first successful cycle resets it.

use crate::events::{EventSenders, IngestTick, PollDelayHint, PollTickReceiver};
use crate::feeds::{FeedError, SourceFeed, SourceId};
use crate::store::{CursorStore, EventStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Errors a poll cycle can fail with.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Cursor-driven ingestion for one source.
pub struct FeedPoller<S, F> {
    store: Arc<S>,
    feed: F,
}

impl<S, F> FeedPoller<S, F>
where
    S: EventStore + CursorStore,
    F: SourceFeed,
{
    pub fn new(store: Arc<S>, feed: F) -> Self {
        Self { store, feed }
    }

    pub fn source_id(&self) -> SourceId {
        self.feed.source_id()
    }

    /// Run one poll cycle. Returns the number of newly persisted events.
    ///
    /// The cursor only advances after the batch is durable, so a crash
    /// between fetch and persist causes a re-fetch the store deduplicates.
    pub async fn poll_once(&self) -> Result<u64, IngestError> {
        let source = self.feed.source_id().to_string();
        let cursor = self.store.get_cursor(&source).await?;
        let batch = self.feed.fetch_since(cursor.as_ref()).await?;

        let mut valid = Vec::with_capacity(batch.events.len());
        for event in batch.events {
            match event.validate() {
                Ok(()) => valid.push(event),
                Err(error) => {
                    warn!(%source, %error, "Skipping invalid event");
                }
            }
        }

        let inserted = self.store.insert_events(valid).await?;

        if let Some(position) = batch.next_position {
            self.store.advance_cursor(&source, position).await?;
        }

        Ok(inserted)
    }
}

/// Runner for a [`FeedPoller`]: receives `PollTick`s, runs cycles, emits
/// `IngestTick`s downstream and `PollDelayHint`s back to the scheduler.
pub struct FeedPollerRunner<S, F> {
    poller: FeedPoller<S, F>,
    tick_rx: PollTickReceiver,
    senders: EventSenders,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S, F> FeedPollerRunner<S, F>
where
    S: EventStore + CursorStore,
    F: SourceFeed,
{
    pub fn new(
        poller: FeedPoller<S, F>,
        tick_rx: PollTickReceiver,
        senders: EventSenders,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            poller,
            tick_rx,
            senders,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        let source = self.poller.source_id();
        let mut consecutive_failures = 0u32;

        info!(%source, "FeedPollerRunner started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!(%source, "FeedPollerRunner shutting down");
                        break;
                    }
                }

                Some(tick) = self.tick_rx.recv() => {
                    if tick.source != source {
                        warn!(
                            expected = %source,
                            received = %tick.source,
                            "Received mismatched PollTick"
                        );
                        continue;
                    }

                    match self.poller.poll_once().await {
                        Ok(inserted) => {
                            debug!(%source, inserted, "Poll cycle completed");
                            if consecutive_failures > 0 {
                                consecutive_failures = 0;
                                self.send_delay_hint(&source, 0).await;
                            }
                            self.senders
                                .broadcast_ingest(IngestTick {
                                    source: source.clone(),
                                    inserted,
                                })
                                .await;
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            error!(
                                %source,
                                consecutive_failures,
                                error = %e,
                                "Poll cycle failed"
                            );
                            self.send_delay_hint(&source, consecutive_failures).await;
                        }
                    }
                }

                else => {
                    info!(%source, "PollTick channel closed");
                    break;
                }
            }
        }

        info!(%source, "FeedPollerRunner shutdown complete");
    }

    async fn send_delay_hint(&self, source: &SourceId, consecutive_failures: u32) {
        let hint = PollDelayHint {
            source: source.clone(),
            consecutive_failures,
        };
        if let Err(e) = self.senders.delay_hint.send(hint).await {
            warn!(%source, error = %e, "Failed to send PollDelayHint, receiver dropped");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::activity_event::{EventPayload, NewActivityEvent, ResourceRef};
    use crate::entities::feed_cursor::FeedPosition;
    use crate::feeds::FeedBatch;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use time::macros::datetime;

    struct StubFeed {
        batches: Mutex<Vec<Result<FeedBatch, FeedError>>>,
        seen_positions: Mutex<Vec<Option<FeedPosition>>>,
    }

    impl StubFeed {
        fn new(batches: Vec<Result<FeedBatch, FeedError>>) -> Self {
            Self {
                batches: Mutex::new(batches),
                seen_positions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SourceFeed for StubFeed {
        fn source_id(&self) -> SourceId {
            SourceId::Github {
                user: "octocat".to_string(),
            }
        }

        async fn fetch_since(
            &self,
            position: Option<&FeedPosition>,
        ) -> Result<FeedBatch, FeedError> {
            self.seen_positions.lock().unwrap().push(position.cloned());
            self.batches.lock().unwrap().remove(0)
        }
    }

    fn commit(id: &str) -> NewActivityEvent {
        NewActivityEvent {
            event_id: id.to_string(),
            occurred_at: datetime!(2025-03-01 12:00 UTC),
            resource: ResourceRef::new("octocat", "hello-world"),
            actor: "octocat".to_string(),
            actor_avatar: None,
            is_public: true,
            venue: None,
            native_event_id: None,
            payload: EventPayload::Commit {
                sha: id.to_string(),
                message: "fix parser".to_string(),
                branch: "main".to_string(),
                url: String::new(),
            },
        }
    }

    #[tokio::test]
    async fn cycle_persists_batch_and_advances_cursor() {
        let store = Arc::new(MemoryStore::new());
        let position = FeedPosition::at(datetime!(2025-03-01 12:00 UTC));
        let feed = StubFeed::new(vec![Ok(FeedBatch {
            events: vec![commit("a"), commit("b")],
            next_position: Some(position.clone()),
        })]);
        let poller = FeedPoller::new(store.clone(), feed);

        let inserted = poller.poll_once().await.unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(
            store.get_cursor("github:octocat").await.unwrap(),
            Some(position)
        );
    }

    #[tokio::test]
    async fn refetched_batch_deduplicates_to_zero() {
        let store = Arc::new(MemoryStore::new());
        let batch = || {
            Ok(FeedBatch {
                events: vec![commit("a")],
                next_position: None,
            })
        };
        let poller = FeedPoller::new(store, StubFeed::new(vec![batch(), batch()]));
        assert_eq!(poller.poll_once().await.unwrap(), 1);
        assert_eq!(poller.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn invalid_records_are_skipped_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        let mut bad = commit("");
        bad.event_id = String::new();
        let feed = StubFeed::new(vec![Ok(FeedBatch {
            events: vec![bad, commit("a")],
            next_position: None,
        })]);
        let poller = FeedPoller::new(store, feed);
        assert_eq!(poller.poll_once().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn poller_hands_stored_cursor_to_the_feed() {
        let store = Arc::new(MemoryStore::new());
        store
            .advance_cursor(
                "github:octocat",
                FeedPosition::at(datetime!(2025-03-01 10:00 UTC)),
            )
            .await
            .unwrap();
        let feed = StubFeed::new(vec![Ok(FeedBatch::default())]);
        let poller = FeedPoller::new(store, feed);
        poller.poll_once().await.unwrap();
        let seen = poller.feed.seen_positions.lock().unwrap();
        assert_eq!(
            seen[0],
            Some(FeedPosition::at(datetime!(2025-03-01 10:00 UTC)))
        );
    }
}

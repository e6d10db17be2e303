//! Delivery pipeline.
//!
//! Drains undelivered events out of the store and hands them to a
//! [`Notifier`], at-least-once: an event is marked posted only after the
//! notifier accepted it, so a crash in between causes a redelivery, never a
//! loss. Kinds drain concurrently; within one kind events are attempted
//! strictly in ingestion order, and a failed record is skipped so the rest
//! of the batch still goes out while it waits for the next cycle.

use crate::config::DeliveryConfig;
use crate::entities::EventKind;
use crate::entities::activity_event::ActivityEvent;
use crate::events::IngestTickReceiver;
use crate::store::EventStore;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Errors a notification attempt can fail with.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Trait for notification channel implementations.
///
/// `notify` must only return `Ok` once the channel has durably accepted the
/// event; the pipeline marks it posted on that signal.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &ActivityEvent) -> Result<(), NotifyError>;
}

/// Drains undelivered events into a notifier.
pub struct DeliveryPipeline<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    config: DeliveryConfig,
}

impl<S, N> DeliveryPipeline<S, N>
where
    S: EventStore,
    N: Notifier,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: DeliveryConfig) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Run one delivery cycle over every event kind. Returns the number of
    /// events delivered and marked posted.
    pub async fn deliver_pending(&self) -> u64 {
        let per_kind = EventKind::ALL.map(|kind| self.deliver_kind(kind));
        join_all(per_kind).await.into_iter().sum()
    }

    /// Drain one kind, oldest first. A failed record is skipped, never
    /// fatal for the batch: it stays unposted and retries next cycle while
    /// the records behind it are still attempted, in order.
    async fn deliver_kind(&self, kind: EventKind) -> u64 {
        let pending = match self
            .store
            .list_unposted(kind, self.config.batch_limit, self.config.max_age())
            .await
        {
            Ok(pending) => pending,
            Err(error) => {
                error!(%kind, %error, "Failed to list undelivered events");
                return 0;
            }
        };

        let mut delivered = 0;
        for event in &pending {
            if let Err(error) = self.notifier.notify(event).await {
                warn!(
                    %kind,
                    event_id = %event.event_id,
                    %error,
                    "Notification failed, will retry next cycle"
                );
                continue;
            }
            match self
                .store
                .mark_posted(&event.event_id, OffsetDateTime::now_utc())
                .await
            {
                Ok(_) => delivered += 1,
                Err(error) => {
                    // The event went out but is still unposted; it will be
                    // redelivered, which at-least-once permits.
                    error!(%kind, event_id = %event.event_id, %error, "Failed to mark event posted");
                    break;
                }
            }
        }
        delivered
    }
}

/// Runner for a [`DeliveryPipeline`]: one cycle per `IngestTick`.
pub struct DeliveryRunner<S, N> {
    pipeline: DeliveryPipeline<S, N>,
    ingest_rx: IngestTickReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S, N> DeliveryRunner<S, N>
where
    S: EventStore,
    N: Notifier,
{
    pub fn new(
        pipeline: DeliveryPipeline<S, N>,
        ingest_rx: IngestTickReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pipeline,
            ingest_rx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!("DeliveryRunner started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("DeliveryRunner received shutdown signal");
                        break;
                    }
                }

                Some(tick) = self.ingest_rx.recv() => {
                    debug!(source = %tick.source, inserted = tick.inserted, "Received IngestTick");
                    let delivered = self.pipeline.deliver_pending().await;
                    if delivered > 0 {
                        debug!(delivered, "Delivery cycle completed");
                    }
                }

                else => {
                    info!("IngestTick channel closed");
                    break;
                }
            }
        }

        info!("DeliveryRunner shutdown complete");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::activity_event::{EventPayload, NewActivityEvent, ResourceRef};
    use crate::store::memory::MemoryStore;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use time::macros::datetime;

    /// Records delivery order; fails permanently for configured event ids.
    #[derive(Default)]
    struct RecordingNotifier {
        delivered: Mutex<Vec<String>>,
        failing: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, event: &ActivityEvent) -> Result<(), NotifyError> {
            if self.failing.lock().unwrap().contains(&event.event_id) {
                return Err(NotifyError::Rejected {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            self.delivered.lock().unwrap().push(event.event_id.clone());
            Ok(())
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

    fn star(id: &str) -> NewActivityEvent {
        let mut event = commit(id);
        event.payload = EventPayload::Star {
            action: "started".to_string(),
        };
        event
    }

    fn pipeline(
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
    ) -> DeliveryPipeline<MemoryStore, RecordingNotifier> {
        DeliveryPipeline::new(store, notifier, DeliveryConfig::default())
    }

    #[tokio::test]
    async fn delivers_in_ingestion_order_within_a_kind() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_events(vec![commit("a"), commit("b"), commit("c")])
            .await
            .unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let delivered = pipeline(store, notifier.clone()).deliver_pending().await;
        assert_eq!(delivered, 3);
        assert_eq!(*notifier.delivered.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failed_record_does_not_block_the_rest_of_its_kind() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_events(vec![commit("c1"), commit("c2"), commit("c3"), star("s1")])
            .await
            .unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.failing.lock().unwrap().insert("c1".to_string());

        let delivered = pipeline(store.clone(), notifier.clone())
            .deliver_pending()
            .await;
        // c1 stays unposted for the next cycle; everything behind it is
        // still attempted, commits in ingestion order.
        assert_eq!(delivered, 3);
        let sent = notifier.delivered.lock().unwrap().clone();
        let commits: Vec<_> = sent.iter().filter(|id| id.starts_with('c')).collect();
        assert_eq!(commits, ["c2", "c3"]);
        assert!(sent.iter().any(|id| id == "s1"));
        let pending = store
            .list_unposted(EventKind::Commit, 10, time::Duration::hours(12))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_id, "c1");
    }

    #[tokio::test]
    async fn failed_event_is_redelivered_next_cycle() {
        let store = Arc::new(MemoryStore::new());
        store.insert_events(vec![commit("a")]).await.unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.failing.lock().unwrap().insert("a".to_string());

        let p = pipeline(store, notifier.clone());
        assert_eq!(p.deliver_pending().await, 0);

        notifier.failing.lock().unwrap().clear();
        assert_eq!(p.deliver_pending().await, 1);
        // A third cycle finds nothing; posted is effective exactly once.
        assert_eq!(p.deliver_pending().await, 0);
    }
}

//! MarketTracker processor.
//!
//! Folds committed marketplace events into listing lifecycle state behind
//! its own processed-watermark:
//! - a `Listing` opens a listing (idempotently)
//! - a `Sale` records a sale fact and closes the matching listing
//! - a `Delisting` records a delisting fact and closes the listing
//!
//! A listing closes at most once; whichever of sale or delisting arrives
//! first wins and the other becomes a recorded fact against an already
//! closed listing. Facts are kept even when no matching listing exists,
//! because marketplace feeds are not gap-free.

use crate::entities::activity_event::{ActivityEvent, EventPayload};
use crate::entities::listings::{DelistingFact, ListingKey, ListingRecord, SaleFact};
use crate::events::IngestTickReceiver;
use crate::store::{CursorStore, EventStore, MarketStore, StoreError};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Watermark key of this consumer.
pub const MARKET_CONSUMER: &str = "market-tracker";

const MARKET_BATCH_LIMIT: i64 = 200;

/// Folds committed events into marketplace state.
pub struct MarketTracker<S> {
    store: Arc<S>,
}

impl<S> MarketTracker<S>
where
    S: EventStore + CursorStore + MarketStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Fold one batch of committed events. Returns how many events were
    /// consumed (of any kind; only marketplace kinds affect state).
    pub async fn fold_committed(&self) -> Result<u64, StoreError> {
        let mark = self.store.get_watermark(MARKET_CONSUMER).await?;
        let events = self
            .store
            .list_committed_after(mark.as_ref(), MARKET_BATCH_LIMIT)
            .await?;
        let Some(last) = events.last() else {
            return Ok(0);
        };
        let next_mark = last.watermark();

        for event in &events {
            if !event.kind.is_marketplace() {
                continue;
            }
            self.fold_event(event).await?;
        }

        let consumed = events.len() as u64;
        self.store
            .advance_watermark(MARKET_CONSUMER, next_mark)
            .await?;
        Ok(consumed)
    }

    async fn fold_event(&self, event: &ActivityEvent) -> Result<(), StoreError> {
        let Some(venue) = event.venue.clone() else {
            // Validation at ingest should make this unreachable.
            warn!(event_id = %event.event_id, kind = %event.kind, "Marketplace event without venue");
            return Ok(());
        };

        match &event.payload.0 {
            EventPayload::Listing {
                listing_id,
                seller,
                price,
                currency,
            } => {
                let record = ListingRecord {
                    resource_owner: event.resource_owner.clone(),
                    resource_name: event.resource_name.clone(),
                    venue,
                    listing_id: listing_id.clone(),
                    seller: seller.clone(),
                    price: *price,
                    currency: currency.clone(),
                    is_active: true,
                    listed_at: event.occurred_at,
                };
                if self.store.open_listing(record).await? {
                    debug!(listing_id, "Listing opened");
                }
            }
            EventPayload::Sale {
                listing_id,
                seller,
                buyer,
                price,
                currency,
            } => {
                let fact = SaleFact {
                    event_id: event.event_id.clone(),
                    resource_owner: event.resource_owner.clone(),
                    resource_name: event.resource_name.clone(),
                    venue: venue.clone(),
                    listing_id: listing_id.clone(),
                    seller: seller.clone(),
                    buyer: buyer.clone(),
                    price: *price,
                    currency: currency.clone(),
                    sold_at: event.occurred_at,
                };
                self.store.record_sale(fact).await?;
                if let Some(listing_id) = listing_id {
                    let key = ListingKey {
                        resource_owner: event.resource_owner.clone(),
                        resource_name: event.resource_name.clone(),
                        venue,
                        listing_id: listing_id.clone(),
                    };
                    if self.store.close_listing(&key).await? {
                        debug!(listing_id, "Listing closed by sale");
                    }
                }
            }
            EventPayload::Delisting { listing_id, .. } => {
                let fact = DelistingFact {
                    event_id: event.event_id.clone(),
                    resource_owner: event.resource_owner.clone(),
                    resource_name: event.resource_name.clone(),
                    venue: venue.clone(),
                    listing_id: listing_id.clone(),
                    delisted_at: event.occurred_at,
                };
                self.store.record_delisting(fact).await?;
                let key = ListingKey {
                    resource_owner: event.resource_owner.clone(),
                    resource_name: event.resource_name.clone(),
                    venue,
                    listing_id: listing_id.clone(),
                };
                if self.store.close_listing(&key).await? {
                    debug!(listing_id, "Listing closed by delisting");
                }
            }
            // Mints, burns and transfers carry no listing state.
            _ => {}
        }
        Ok(())
    }
}

/// Runner for a [`MarketTracker`]: folds after every `IngestTick`.
pub struct MarketTrackerRunner<S> {
    tracker: MarketTracker<S>,
    ingest_rx: IngestTickReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S> MarketTrackerRunner<S>
where
    S: EventStore + CursorStore + MarketStore,
{
    pub fn new(
        tracker: MarketTracker<S>,
        ingest_rx: IngestTickReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            tracker,
            ingest_rx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!("MarketTrackerRunner started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("MarketTrackerRunner received shutdown signal");
                        break;
                    }
                }

                Some(tick) = self.ingest_rx.recv() => {
                    debug!(source = %tick.source, "Received IngestTick");
                    loop {
                        match self.tracker.fold_committed().await {
                            Ok(0) => break,
                            Ok(consumed) => {
                                debug!(consumed, "Folded committed events");
                            }
                            Err(error) => {
                                tracing::error!(%error, "Market fold failed");
                                break;
                            }
                        }
                    }
                }

                else => {
                    info!("IngestTick channel closed");
                    break;
                }
            }
        }

        info!("MarketTrackerRunner shutdown complete");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::activity_event::{NewActivityEvent, ResourceRef};
    use crate::store::memory::MemoryStore;
    use rust_decimal::Decimal;
    use time::macros::datetime;

    fn market_event(id: &str, payload: EventPayload) -> NewActivityEvent {
        NewActivityEvent {
            event_id: id.to_string(),
            occurred_at: datetime!(2025-03-01 12:00 UTC),
            resource: ResourceRef::new("ethereum", "0xabc"),
            actor: "0xseller".to_string(),
            actor_avatar: None,
            is_public: true,
            venue: Some("opensea".to_string()),
            native_event_id: Some(id.to_string()),
            payload,
        }
    }

    fn listing(id: &str, listing_id: &str) -> NewActivityEvent {
        market_event(
            id,
            EventPayload::Listing {
                listing_id: listing_id.to_string(),
                seller: "0xseller".to_string(),
                price: Decimal::ONE,
                currency: "ETH".to_string(),
            },
        )
    }

    fn sale(id: &str, listing_id: Option<&str>) -> NewActivityEvent {
        market_event(
            id,
            EventPayload::Sale {
                listing_id: listing_id.map(str::to_string),
                seller: Some("0xseller".to_string()),
                buyer: "0xbuyer".to_string(),
                price: Decimal::ONE,
                currency: "ETH".to_string(),
            },
        )
    }

    fn delisting(id: &str, listing_id: &str) -> NewActivityEvent {
        market_event(
            id,
            EventPayload::Delisting {
                listing_id: listing_id.to_string(),
                seller: Some("0xseller".to_string()),
            },
        )
    }

    fn key(listing_id: &str) -> ListingKey {
        ListingKey {
            resource_owner: "ethereum".to_string(),
            resource_name: "0xabc".to_string(),
            venue: "opensea".to_string(),
            listing_id: listing_id.to_string(),
        }
    }

    #[tokio::test]
    async fn sale_closes_the_open_listing() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_events(vec![listing("l1", "order-1"), sale("s1", Some("order-1"))])
            .await
            .unwrap();
        MarketTracker::new(store.clone()).fold_committed().await.unwrap();

        let listing = store.get_listing(&key("order-1")).await.unwrap().unwrap();
        assert!(!listing.is_active);
    }

    #[tokio::test]
    async fn listing_closes_at_most_once() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_events(vec![
                listing("l1", "order-1"),
                sale("s1", Some("order-1")),
                delisting("d1", "order-1"),
            ])
            .await
            .unwrap();
        MarketTracker::new(store.clone()).fold_committed().await.unwrap();

        // Both facts exist; the sale won the close.
        assert!(!store.get_listing(&key("order-1")).await.unwrap().unwrap().is_active);
        assert!(!store.close_listing(&key("order-1")).await.unwrap());
        assert!(!store.record_delisting(DelistingFact {
            event_id: "d1".to_string(),
            resource_owner: "ethereum".to_string(),
            resource_name: "0xabc".to_string(),
            venue: "opensea".to_string(),
            listing_id: "order-1".to_string(),
            delisted_at: datetime!(2025-03-01 12:00 UTC),
        })
        .await
        .unwrap());
    }

    #[tokio::test]
    async fn sale_without_matching_listing_still_records_the_fact() {
        let store = Arc::new(MemoryStore::new());
        store.insert_events(vec![sale("s1", None)]).await.unwrap();
        let tracker = MarketTracker::new(store.clone());
        assert_eq!(tracker.fold_committed().await.unwrap(), 1);
        assert!(!store.record_sale(SaleFact {
            event_id: "s1".to_string(),
            resource_owner: "ethereum".to_string(),
            resource_name: "0xabc".to_string(),
            venue: "opensea".to_string(),
            listing_id: None,
            seller: None,
            buyer: "0xbuyer".to_string(),
            price: Decimal::ONE,
            currency: "ETH".to_string(),
            sold_at: datetime!(2025-03-01 12:00 UTC),
        })
        .await
        .unwrap());
    }

    #[tokio::test]
    async fn replayed_fold_is_a_watermarked_no_op() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_events(vec![listing("l1", "order-1")])
            .await
            .unwrap();
        let tracker = MarketTracker::new(store.clone());
        assert_eq!(tracker.fold_committed().await.unwrap(), 1);
        assert_eq!(tracker.fold_committed().await.unwrap(), 0);
    }
}

//! OpenSea collection-events feed.
//!
//! Polls `/api/v2/events/collection/{slug}` and normalizes sales, transfers
//! and order lifecycle events. Transfers from or to the zero address become
//! mints and burns. Event ids are derived from the venue-native identifiers
//! (order hash or transaction + token), so a re-fetched window deduplicates
//! in the store.

use crate::entities::activity_event::{EventPayload, NewActivityEvent, ResourceRef};
use crate::entities::feed_cursor::FeedPosition;
use crate::feeds::{FeedBatch, FeedError, SourceFeed, SourceId};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::warn;

const OPENSEA_API_URL: &str = "https://api.opensea.io/api/v2";
const PAGE_LIMIT: u32 = 50;
const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Feed over one collection's marketplace events.
pub struct OpenSeaEventsFeed {
    slug: String,
    chain: String,
    contract: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl OpenSeaEventsFeed {
    pub const VENUE: &'static str = "opensea";

    pub fn new(slug: String, chain: String, contract: String, api_key: Option<String>) -> Self {
        Self {
            slug,
            chain,
            contract,
            api_key,
            http_client: reqwest::Client::new(),
        }
    }

    async fn fetch_page(
        &self,
        after: Option<OffsetDateTime>,
        next: Option<&str>,
    ) -> Result<RawEventsPage, FeedError> {
        let url = format!("{OPENSEA_API_URL}/events/collection/{}", self.slug);
        let mut request = self
            .http_client
            .get(&url)
            .query(&[("limit", PAGE_LIMIT.to_string())])
            .header("Accept", "application/json");
        if let Some(after) = after {
            request = request.query(&[("after", after.unix_timestamp().to_string())]);
        }
        if let Some(next) = next {
            request = request.query(&[("next", next.to_string())]);
        }
        if let Some(api_key) = &self.api_key {
            request = request.header("X-API-KEY", api_key);
        }
        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FeedError::RateLimited { retry_after_secs: 5 });
        }
        if !response.status().is_success() {
            return Err(FeedError::Api {
                message: format!("OpenSea returned {}", response.status()),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SourceFeed for OpenSeaEventsFeed {
    fn source_id(&self) -> SourceId {
        SourceId::Marketplace {
            venue: Self::VENUE.to_string(),
            chain: self.chain.clone(),
            contract: self.contract.clone(),
        }
    }

    async fn fetch_since(&self, position: Option<&FeedPosition>) -> Result<FeedBatch, FeedError> {
        let after = position.and_then(|p| p.last_seen_at);
        let page = self
            .fetch_page(after, position.and_then(|p| p.page_token.as_deref()))
            .await?;

        let mut events = Vec::new();
        let mut newest = after;
        for raw in page.asset_events {
            let occurred_at = match OffsetDateTime::from_unix_timestamp(raw.event_timestamp) {
                Ok(ts) => ts,
                Err(_) => {
                    warn!(
                        event_type = %raw.event_type,
                        timestamp = raw.event_timestamp,
                        "Skipping marketplace event with invalid timestamp"
                    );
                    continue;
                }
            };
            newest = Some(newest.map_or(occurred_at, |n| n.max(occurred_at)));
            match normalize_event(&self.chain, &self.contract, raw, occurred_at) {
                Some(event) => events.push(event),
                None => continue,
            }
        }

        Ok(FeedBatch {
            events,
            next_position: Some(FeedPosition {
                last_seen_at: newest,
                page_token: page.next,
            }),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawEventsPage {
    #[serde(default)]
    asset_events: Vec<RawAssetEvent>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAssetEvent {
    event_type: String,
    event_timestamp: i64,
    order_hash: Option<String>,
    transaction: Option<String>,
    maker: Option<String>,
    seller: Option<String>,
    buyer: Option<String>,
    from_address: Option<String>,
    to_address: Option<String>,
    nft: Option<RawNft>,
    payment: Option<RawPayment>,
}

#[derive(Debug, Deserialize)]
struct RawNft {
    identifier: String,
}

#[derive(Debug, Deserialize)]
struct RawPayment {
    quantity: String,
    symbol: String,
    decimals: u32,
}

fn parse_price(payment: &RawPayment) -> Option<Decimal> {
    let raw: Decimal = payment.quantity.parse().ok()?;
    let divisor = Decimal::from(10u64.checked_pow(payment.decimals)?);
    Some(raw / divisor)
}

/// Normalize one raw marketplace event. Returns `None` for unknown types
/// and for records missing the fields their type requires.
fn normalize_event(
    chain: &str,
    contract: &str,
    raw: RawAssetEvent,
    occurred_at: OffsetDateTime,
) -> Option<NewActivityEvent> {
    let native_id = |tail: &str| format!("{}:{tail}", raw.event_type);
    let envelope = |native_event_id: String, actor: String, payload: EventPayload| {
        NewActivityEvent {
            event_id: format!(
                "{}:{chain}:{contract}:{native_event_id}",
                OpenSeaEventsFeed::VENUE
            ),
            occurred_at,
            resource: ResourceRef::new(chain, contract),
            actor,
            actor_avatar: None,
            is_public: true,
            venue: Some(OpenSeaEventsFeed::VENUE.to_string()),
            native_event_id: Some(native_event_id),
            payload,
        }
    };

    let skip = |reason: &str| {
        warn!(
            event_type = %raw.event_type,
            reason,
            "Skipping malformed marketplace event"
        );
    };

    match raw.event_type.as_str() {
        "sale" => {
            let Some(buyer) = raw.buyer.clone() else {
                skip("missing buyer");
                return None;
            };
            let Some(payment) = raw.payment.as_ref() else {
                skip("missing payment");
                return None;
            };
            let Some(price) = parse_price(payment) else {
                skip("unparseable price");
                return None;
            };
            let tx = raw.transaction.clone()?;
            Some(envelope(
                native_id(&tx),
                buyer.clone(),
                EventPayload::Sale {
                    listing_id: raw.order_hash.clone(),
                    seller: raw.seller.clone(),
                    buyer,
                    price,
                    currency: payment.symbol.clone(),
                },
            ))
        }
        "transfer" => {
            let from = raw.from_address.clone()?;
            let to = raw.to_address.clone()?;
            let token_id = raw.nft.as_ref()?.identifier.clone();
            let tx = raw.transaction.clone()?;
            let tail = format!("{tx}:{token_id}");
            if from == ZERO_ADDRESS {
                Some(envelope(
                    native_id(&tail),
                    to.clone(),
                    EventPayload::Mint { token_id, to },
                ))
            } else if to == ZERO_ADDRESS {
                Some(envelope(
                    native_id(&tail),
                    from.clone(),
                    EventPayload::Burn { token_id, from },
                ))
            } else {
                Some(envelope(
                    native_id(&tail),
                    from.clone(),
                    EventPayload::Transfer { token_id, from, to },
                ))
            }
        }
        "order" => {
            let Some(listing_id) = raw.order_hash.clone() else {
                skip("missing order hash");
                return None;
            };
            let Some(seller) = raw.maker.clone() else {
                skip("missing maker");
                return None;
            };
            let Some(payment) = raw.payment.as_ref() else {
                skip("missing payment");
                return None;
            };
            let Some(price) = parse_price(payment) else {
                skip("unparseable price");
                return None;
            };
            Some(envelope(
                native_id(&listing_id),
                seller.clone(),
                EventPayload::Listing {
                    listing_id,
                    seller,
                    price,
                    currency: payment.symbol.clone(),
                },
            ))
        }
        "cancel" => {
            let Some(listing_id) = raw.order_hash.clone() else {
                skip("missing order hash");
                return None;
            };
            Some(envelope(
                native_id(&listing_id),
                raw.maker.clone().unwrap_or_else(|| "unknown".to_string()),
                EventPayload::Delisting {
                    listing_id,
                    seller: raw.maker.clone(),
                },
            ))
        }
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::EventKind;

    fn raw(value: serde_json::Value) -> RawAssetEvent {
        serde_json::from_value(value).unwrap()
    }

    fn normalize(value: serde_json::Value) -> Option<NewActivityEvent> {
        let raw = raw(value);
        let ts = OffsetDateTime::from_unix_timestamp(raw.event_timestamp).unwrap();
        normalize_event("ethereum", "0xabc", raw, ts)
    }

    #[test]
    fn sale_event_normalizes_price_by_decimals() {
        let event = normalize(serde_json::json!({
            "event_type": "sale",
            "event_timestamp": 1740830400,
            "order_hash": "0xorder",
            "transaction": "0xtx",
            "seller": "0xseller",
            "buyer": "0xbuyer",
            "payment": { "quantity": "1500000000000000000", "symbol": "ETH", "decimals": 18 },
        }))
        .unwrap();
        assert_eq!(event.kind(), EventKind::Sale);
        assert_eq!(event.venue.as_deref(), Some("opensea"));
        assert_eq!(event.native_event_id.as_deref(), Some("sale:0xtx"));
        match event.payload {
            EventPayload::Sale { price, currency, .. } => {
                assert_eq!(price, Decimal::new(15, 1));
                assert_eq!(currency, "ETH");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn transfer_from_zero_address_is_a_mint() {
        let event = normalize(serde_json::json!({
            "event_type": "transfer",
            "event_timestamp": 1740830400,
            "transaction": "0xtx",
            "from_address": ZERO_ADDRESS,
            "to_address": "0xminter",
            "nft": { "identifier": "7" },
        }))
        .unwrap();
        assert_eq!(event.kind(), EventKind::Mint);
        assert_eq!(event.actor, "0xminter");
    }

    #[test]
    fn transfer_to_zero_address_is_a_burn() {
        let event = normalize(serde_json::json!({
            "event_type": "transfer",
            "event_timestamp": 1740830400,
            "transaction": "0xtx",
            "from_address": "0xholder",
            "to_address": ZERO_ADDRESS,
            "nft": { "identifier": "7" },
        }))
        .unwrap();
        assert_eq!(event.kind(), EventKind::Burn);
    }

    #[test]
    fn order_and_cancel_map_to_listing_lifecycle() {
        let listing = normalize(serde_json::json!({
            "event_type": "order",
            "event_timestamp": 1740830400,
            "order_hash": "0xorder",
            "maker": "0xseller",
            "payment": { "quantity": "2000000", "symbol": "USDC", "decimals": 6 },
        }))
        .unwrap();
        assert_eq!(listing.kind(), EventKind::Listing);

        let cancel = normalize(serde_json::json!({
            "event_type": "cancel",
            "event_timestamp": 1740830500,
            "order_hash": "0xorder",
            "maker": "0xseller",
        }))
        .unwrap();
        assert_eq!(cancel.kind(), EventKind::Delisting);
    }

    #[test]
    fn sale_without_payment_is_skipped() {
        assert!(normalize(serde_json::json!({
            "event_type": "sale",
            "event_timestamp": 1740830400,
            "transaction": "0xtx",
            "buyer": "0xbuyer",
        }))
        .is_none());
    }
}

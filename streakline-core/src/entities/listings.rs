//! Marketplace listing lifecycle state.
//!
//! A listing opens active and closes exactly once, through either a sale or
//! a delisting. Sales and delistings are also recorded as immutable facts
//! keyed by the triggering event id, independently of whether a matching
//! open listing exists, because marketplace feeds are not gap-free.

use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use time::OffsetDateTime;

/// Identity of a listing: collection (chain + contract), venue, and the
/// venue-native listing id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingKey {
    pub resource_owner: String,
    pub resource_name: String,
    pub venue: String,
    pub listing_id: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ListingRecord {
    pub resource_owner: String,
    pub resource_name: String,
    pub venue: String,
    pub listing_id: String,
    pub seller: String,
    pub price: Decimal,
    pub currency: String,
    pub is_active: bool,
    pub listed_at: OffsetDateTime,
}

impl ListingRecord {
    pub fn key(&self) -> ListingKey {
        ListingKey {
            resource_owner: self.resource_owner.clone(),
            resource_name: self.resource_name.clone(),
            venue: self.venue.clone(),
            listing_id: self.listing_id.clone(),
        }
    }
}

/// Immutable record of a completed sale.
#[derive(Debug, Clone)]
pub struct SaleFact {
    pub event_id: String,
    pub resource_owner: String,
    pub resource_name: String,
    pub venue: String,
    pub listing_id: Option<String>,
    pub seller: Option<String>,
    pub buyer: String,
    pub price: Decimal,
    pub currency: String,
    pub sold_at: OffsetDateTime,
}

/// Immutable record of a listing withdrawn without a sale.
#[derive(Debug, Clone)]
pub struct DelistingFact {
    pub event_id: String,
    pub resource_owner: String,
    pub resource_name: String,
    pub venue: String,
    pub listing_id: String,
    pub delisted_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
/// Open a listing if it is not already known.
pub struct OpenListing {
    pub record: ListingRecord,
}

impl Processor<OpenListing> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:OpenListing")]
    async fn process(&self, cmd: OpenListing) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO nft_listings
                (resource_owner, resource_name, venue, listing_id,
                 seller, price, currency, is_active, listed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, $8)
            ON CONFLICT (resource_owner, resource_name, venue, listing_id) DO NOTHING
            "#,
        )
        .bind(&cmd.record.resource_owner)
        .bind(&cmd.record.resource_name)
        .bind(&cmd.record.venue)
        .bind(&cmd.record.listing_id)
        .bind(&cmd.record.seller)
        .bind(cmd.record.price)
        .bind(&cmd.record.currency)
        .bind(cmd.record.listed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
/// Close a listing; effective only while it is still active.
///
/// Returns whether this call performed the close. A listing already closed
/// by an earlier sale or delisting is left untouched.
pub struct CloseListing {
    pub key: ListingKey,
}

impl Processor<CloseListing> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CloseListing")]
    async fn process(&self, cmd: CloseListing) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE nft_listings
            SET is_active = FALSE
            WHERE resource_owner = $1
              AND resource_name = $2
              AND venue = $3
              AND listing_id = $4
              AND is_active = TRUE
            "#,
        )
        .bind(&cmd.key.resource_owner)
        .bind(&cmd.key.resource_name)
        .bind(&cmd.key.venue)
        .bind(&cmd.key.listing_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
pub struct GetListing {
    pub key: ListingKey,
}

impl Processor<GetListing> for DatabaseProcessor {
    type Output = Option<ListingRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetListing")]
    async fn process(&self, query: GetListing) -> Result<Option<ListingRecord>, sqlx::Error> {
        sqlx::query_as::<_, ListingRecord>(
            r#"
            SELECT resource_owner, resource_name, venue, listing_id,
                   seller, price, currency, is_active, listed_at
            FROM nft_listings
            WHERE resource_owner = $1
              AND resource_name = $2
              AND venue = $3
              AND listing_id = $4
            "#,
        )
        .bind(&query.key.resource_owner)
        .bind(&query.key.resource_name)
        .bind(&query.key.venue)
        .bind(&query.key.listing_id)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Record a sale fact; a replayed event is a no-op.
pub struct InsertSaleFact {
    pub fact: SaleFact,
}

impl Processor<InsertSaleFact> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertSaleFact")]
    async fn process(&self, cmd: InsertSaleFact) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO nft_sales
                (event_id, resource_owner, resource_name, venue, listing_id,
                 seller, buyer, price, currency, sold_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&cmd.fact.event_id)
        .bind(&cmd.fact.resource_owner)
        .bind(&cmd.fact.resource_name)
        .bind(&cmd.fact.venue)
        .bind(&cmd.fact.listing_id)
        .bind(&cmd.fact.seller)
        .bind(&cmd.fact.buyer)
        .bind(cmd.fact.price)
        .bind(&cmd.fact.currency)
        .bind(cmd.fact.sold_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
/// Record a delisting fact; a replayed event is a no-op.
pub struct InsertDelistingFact {
    pub fact: DelistingFact,
}

impl Processor<InsertDelistingFact> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertDelistingFact")]
    async fn process(&self, cmd: InsertDelistingFact) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO nft_delistings
                (event_id, resource_owner, resource_name, venue, listing_id, delisted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&cmd.fact.event_id)
        .bind(&cmd.fact.resource_owner)
        .bind(&cmd.fact.resource_name)
        .bind(&cmd.fact.venue)
        .bind(&cmd.fact.listing_id)
        .bind(cmd.fact.delisted_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

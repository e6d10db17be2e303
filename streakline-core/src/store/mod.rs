//! Storage contracts consumed by the processors.
//!
//! Uniqueness and idempotence are enforced by the store, not recomputed by
//! the pipeline logic: `insert_events` silently drops duplicates,
//! `mark_posted` is effective exactly once, cursors and watermarks only
//! move forward. [`crate::framework::DatabaseProcessor`] implements these
//! traits over Postgres (see `postgres`); [`memory::MemoryStore`] provides
//! the same semantics in memory for tests and local runs.

pub mod memory;
pub mod postgres;

use crate::entities::EventKind;
use crate::entities::achievements::AchievementGrant;
use crate::entities::activity_event::{
    ActivityEvent, DayCommitStats, MonthCommitStats, NewActivityEvent, WeekCommitStats,
};
use crate::entities::feed_cursor::FeedPosition;
use crate::entities::listings::{DelistingFact, ListingKey, ListingRecord, SaleFact};
use crate::entities::streaks::StreakRecord;
use crate::entities::watermark::Watermark;
use crate::entities::StreakKind;
use async_trait::async_trait;
use thiserror::Error;
use time::{Date, OffsetDateTime};

/// Store-level failure. The current cycle aborts cleanly and is retried on
/// the next scheduled run; nothing here terminates the process.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Idempotent persistence of activity events plus the delivery-state and
/// derived-state query surface.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a batch; rows already known are dropped. Returns the number
    /// of rows actually inserted.
    async fn insert_events(&self, events: Vec<NewActivityEvent>) -> Result<u64, StoreError>;

    /// Undelivered events of one kind, oldest ingested first, bounded by
    /// `limit` and the `max_age` redelivery window.
    async fn list_unposted(
        &self,
        kind: EventKind,
        limit: i64,
        max_age: time::Duration,
    ) -> Result<Vec<ActivityEvent>, StoreError>;

    /// Transition an event to posted. Returns `false` if it already was;
    /// that is a harmless no-op, not an error.
    async fn mark_posted(
        &self,
        event_id: &str,
        posted_at: OffsetDateTime,
    ) -> Result<bool, StoreError>;

    /// Committed events strictly after `mark`, in `(created_at, event_id)`
    /// order.
    async fn list_committed_after(
        &self,
        mark: Option<&Watermark>,
        limit: i64,
    ) -> Result<Vec<ActivityEvent>, StoreError>;

    /// Commit counters for one user on one UTC day.
    async fn day_commit_stats(&self, username: &str, day: Date)
    -> Result<DayCommitStats, StoreError>;

    /// Commit counters for the Monday-aligned week containing `day`.
    async fn week_commit_stats(
        &self,
        username: &str,
        day: Date,
    ) -> Result<WeekCommitStats, StoreError>;

    /// Commit and pull-request counters for the month containing `day`.
    async fn month_commit_stats(
        &self,
        username: &str,
        day: Date,
    ) -> Result<MonthCommitStats, StoreError>;
}

/// Poll cursors and consumer watermarks. Both are monotonic.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get_cursor(&self, source: &str) -> Result<Option<FeedPosition>, StoreError>;

    /// Advance a cursor; an older position than the stored one is ignored.
    async fn advance_cursor(&self, source: &str, position: FeedPosition)
    -> Result<(), StoreError>;

    async fn get_watermark(&self, consumer: &str) -> Result<Option<Watermark>, StoreError>;

    /// Advance a watermark; never moves backward.
    async fn advance_watermark(&self, consumer: &str, mark: Watermark) -> Result<(), StoreError>;
}

/// Streak records and achievement grants.
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn get_streak(
        &self,
        username: &str,
        kind: StreakKind,
    ) -> Result<Option<StreakRecord>, StoreError>;

    async fn put_streak(&self, record: StreakRecord) -> Result<(), StoreError>;

    /// Record a grant unless the same (user, achievement, period) grant
    /// already exists. Returns whether a row was inserted.
    async fn grant_achievement(&self, grant: AchievementGrant) -> Result<bool, StoreError>;
}

/// Marketplace listing lifecycle state and sale/delisting facts.
#[async_trait]
pub trait MarketStore: Send + Sync {
    async fn open_listing(&self, record: ListingRecord) -> Result<bool, StoreError>;

    /// Close a listing if it is still active; returns whether this call
    /// performed the close.
    async fn close_listing(&self, key: &ListingKey) -> Result<bool, StoreError>;

    async fn get_listing(&self, key: &ListingKey) -> Result<Option<ListingRecord>, StoreError>;

    async fn record_sale(&self, fact: SaleFact) -> Result<bool, StoreError>;

    async fn record_delisting(&self, fact: DelistingFact) -> Result<bool, StoreError>;
}

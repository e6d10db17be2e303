//! Postgres implementation of the storage contracts.
//!
//! Thin delegation onto the query messages defined in `entities`; all SQL
//! lives there.

use crate::entities::achievements::{AchievementGrant, InsertAchievementGrant};
use crate::entities::activity_event::{
    ActivityEvent, DayCommitStats, GetDayCommitStats, GetMonthCommitStats, GetWeekCommitStats,
    InsertActivityEvents, ListCommittedAfter, ListUnpostedEvents, MarkEventPosted,
    MonthCommitStats, NewActivityEvent, WeekCommitStats,
};
use crate::entities::feed_cursor::{AdvanceFeedCursor, FeedPosition, GetFeedCursor};
use crate::entities::listings::{
    CloseListing, DelistingFact, GetListing, InsertDelistingFact, InsertSaleFact, ListingKey,
    ListingRecord, OpenListing, SaleFact,
};
use crate::entities::streaks::{GetStreak, StreakRecord, UpsertStreak};
use crate::entities::watermark::{AdvanceWatermark, GetWatermark, Watermark};
use crate::entities::{EventKind, StreakKind};
use crate::framework::DatabaseProcessor;
use crate::store::{CursorStore, EventStore, MarketStore, StatsStore, StoreError};
use async_trait::async_trait;
use kanau::processor::Processor;
use time::{Date, OffsetDateTime, Time};

#[async_trait]
impl EventStore for DatabaseProcessor {
    async fn insert_events(&self, events: Vec<NewActivityEvent>) -> Result<u64, StoreError> {
        Ok(self.process(InsertActivityEvents { events }).await?)
    }

    async fn list_unposted(
        &self,
        kind: EventKind,
        limit: i64,
        max_age: time::Duration,
    ) -> Result<Vec<ActivityEvent>, StoreError> {
        Ok(self
            .process(ListUnpostedEvents {
                kind,
                limit,
                max_age,
            })
            .await?)
    }

    async fn mark_posted(
        &self,
        event_id: &str,
        posted_at: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        Ok(self
            .process(MarkEventPosted {
                event_id: event_id.to_string(),
                posted_at,
            })
            .await?)
    }

    async fn list_committed_after(
        &self,
        mark: Option<&Watermark>,
        limit: i64,
    ) -> Result<Vec<ActivityEvent>, StoreError> {
        Ok(self
            .process(ListCommittedAfter {
                mark: mark.cloned(),
                limit,
            })
            .await?)
    }

    async fn day_commit_stats(
        &self,
        username: &str,
        day: Date,
    ) -> Result<DayCommitStats, StoreError> {
        Ok(self
            .process(GetDayCommitStats {
                username: username.to_string(),
                day_start: OffsetDateTime::new_utc(day, Time::MIDNIGHT),
            })
            .await?)
    }

    async fn week_commit_stats(
        &self,
        username: &str,
        day: Date,
    ) -> Result<WeekCommitStats, StoreError> {
        Ok(self
            .process(GetWeekCommitStats {
                username: username.to_string(),
                day_start: OffsetDateTime::new_utc(day, Time::MIDNIGHT),
            })
            .await?)
    }

    async fn month_commit_stats(
        &self,
        username: &str,
        day: Date,
    ) -> Result<MonthCommitStats, StoreError> {
        Ok(self
            .process(GetMonthCommitStats {
                username: username.to_string(),
                day_start: OffsetDateTime::new_utc(day, Time::MIDNIGHT),
            })
            .await?)
    }
}

#[async_trait]
impl CursorStore for DatabaseProcessor {
    async fn get_cursor(&self, source: &str) -> Result<Option<FeedPosition>, StoreError> {
        Ok(self
            .process(GetFeedCursor {
                source: source.to_string(),
            })
            .await?)
    }

    async fn advance_cursor(
        &self,
        source: &str,
        position: FeedPosition,
    ) -> Result<(), StoreError> {
        Ok(self
            .process(AdvanceFeedCursor {
                source: source.to_string(),
                position,
            })
            .await?)
    }

    async fn get_watermark(&self, consumer: &str) -> Result<Option<Watermark>, StoreError> {
        Ok(self
            .process(GetWatermark {
                consumer: consumer.to_string(),
            })
            .await?)
    }

    async fn advance_watermark(&self, consumer: &str, mark: Watermark) -> Result<(), StoreError> {
        Ok(self
            .process(AdvanceWatermark {
                consumer: consumer.to_string(),
                mark,
            })
            .await?)
    }
}

#[async_trait]
impl StatsStore for DatabaseProcessor {
    async fn get_streak(
        &self,
        username: &str,
        kind: StreakKind,
    ) -> Result<Option<StreakRecord>, StoreError> {
        Ok(self
            .process(GetStreak {
                username: username.to_string(),
                kind,
            })
            .await?)
    }

    async fn put_streak(&self, record: StreakRecord) -> Result<(), StoreError> {
        Ok(self.process(UpsertStreak { record }).await?)
    }

    async fn grant_achievement(&self, grant: AchievementGrant) -> Result<bool, StoreError> {
        Ok(self.process(InsertAchievementGrant { grant }).await?)
    }
}

#[async_trait]
impl MarketStore for DatabaseProcessor {
    async fn open_listing(&self, record: ListingRecord) -> Result<bool, StoreError> {
        Ok(self.process(OpenListing { record }).await?)
    }

    async fn close_listing(&self, key: &ListingKey) -> Result<bool, StoreError> {
        Ok(self.process(CloseListing { key: key.clone() }).await?)
    }

    async fn get_listing(&self, key: &ListingKey) -> Result<Option<ListingRecord>, StoreError> {
        Ok(self.process(GetListing { key: key.clone() }).await?)
    }

    async fn record_sale(&self, fact: SaleFact) -> Result<bool, StoreError> {
        Ok(self.process(InsertSaleFact { fact }).await?)
    }

    async fn record_delisting(&self, fact: DelistingFact) -> Result<bool, StoreError> {
        Ok(self.process(InsertDelistingFact { fact }).await?)
    }
}

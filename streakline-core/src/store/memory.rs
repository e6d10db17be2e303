//! In-memory store with the same observable semantics as Postgres.
//!
//! Backs the processor tests and local dry runs. Ingestion order is made
//! strictly monotonic by nudging `created_at` forward one microsecond when
//! two inserts land on the same clock reading, matching the total
//! `(created_at, event_id)` order the watermark queries rely on.

use crate::entities::achievements::AchievementGrant;
use crate::entities::activity_event::{
    ActivityEvent, DayCommitStats, EventPayload, MonthCommitStats, NewActivityEvent,
    WeekCommitStats,
};
use crate::entities::feed_cursor::FeedPosition;
use crate::entities::listings::{DelistingFact, ListingKey, ListingRecord, SaleFact};
use crate::entities::streaks::StreakRecord;
use crate::entities::watermark::Watermark;
use crate::entities::{EventKind, StreakKind};
use crate::store::{CursorStore, EventStore, MarketStore, StatsStore, StoreError};
use crate::utils::period::{month_index, week_index};
use async_trait::async_trait;
use sqlx::types::Json;
use std::collections::{BTreeMap, HashMap, HashSet};
use time::{Date, OffsetDateTime, Time};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    /// Keyed by event_id; `order` keeps the committed `(created_at,
    /// event_id)` sequence without re-sorting on every read.
    events: HashMap<String, ActivityEvent>,
    order: BTreeMap<(OffsetDateTime, String), String>,
    marketplace_keys: HashSet<(String, String, String, String)>,
    last_created_at: Option<OffsetDateTime>,
    cursors: HashMap<String, FeedPosition>,
    watermarks: HashMap<String, Watermark>,
    streaks: HashMap<(String, StreakKind), StreakRecord>,
    grants: HashMap<(String, String, String, i64), AchievementGrant>,
    listings: HashMap<ListingKey, ListingRecord>,
    sales: HashMap<String, SaleFact>,
    delistings: HashMap<String, DelistingFact>,
}

/// Shared in-memory store. Cloning is not provided; wrap in `Arc` to share
/// between processors, exactly like a connection pool.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded grant. Test helper.
    pub async fn all_grants(&self) -> Vec<AchievementGrant> {
        let inner = self.inner.lock().await;
        inner.grants.values().cloned().collect()
    }
}

impl Inner {
    fn next_created_at(&mut self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        let ts = match self.last_created_at {
            Some(last) if now <= last => last + time::Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(ts);
        ts
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_events(&self, events: Vec<NewActivityEvent>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut inserted = 0;
        for event in events {
            if inner.events.contains_key(&event.event_id) {
                continue;
            }
            let market_key = match (&event.venue, &event.native_event_id) {
                (Some(venue), Some(native)) => Some((
                    event.resource.owner.clone(),
                    event.resource.name.clone(),
                    venue.clone(),
                    native.clone(),
                )),
                _ => None,
            };
            if let Some(key) = &market_key {
                if inner.marketplace_keys.contains(key) {
                    continue;
                }
            }
            let created_at = inner.next_created_at();
            let row = ActivityEvent {
                event_id: event.event_id.clone(),
                kind: event.kind(),
                occurred_at: event.occurred_at,
                resource_owner: event.resource.owner,
                resource_name: event.resource.name,
                actor: event.actor,
                actor_avatar: event.actor_avatar,
                is_public: event.is_public,
                venue: event.venue,
                native_event_id: event.native_event_id,
                payload: Json(event.payload),
                posted: false,
                posted_at: None,
                created_at,
            };
            inner
                .order
                .insert((created_at, row.event_id.clone()), row.event_id.clone());
            inner.events.insert(row.event_id.clone(), row);
            if let Some(key) = market_key {
                inner.marketplace_keys.insert(key);
            }
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn list_unposted(
        &self,
        kind: EventKind,
        limit: i64,
        max_age: time::Duration,
    ) -> Result<Vec<ActivityEvent>, StoreError> {
        let horizon = OffsetDateTime::now_utc() - max_age;
        let inner = self.inner.lock().await;
        Ok(inner
            .order
            .values()
            .filter_map(|id| inner.events.get(id))
            .filter(|e| e.kind == kind && !e.posted && e.created_at > horizon)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn mark_posted(
        &self,
        event_id: &str,
        posted_at: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.events.get_mut(event_id) {
            Some(event) if !event.posted => {
                event.posted = true;
                event.posted_at = Some(posted_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_committed_after(
        &self,
        mark: Option<&Watermark>,
        limit: i64,
    ) -> Result<Vec<ActivityEvent>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .order
            .values()
            .filter_map(|id| inner.events.get(id))
            .filter(|e| match mark {
                Some(mark) => !mark.covers(e.created_at, &e.event_id),
                None => true,
            })
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn day_commit_stats(
        &self,
        username: &str,
        day: Date,
    ) -> Result<DayCommitStats, StoreError> {
        let day_start = OffsetDateTime::new_utc(day, Time::MIDNIGHT);
        let day_end = day_start + time::Duration::days(1);
        let inner = self.inner.lock().await;
        let mut stats = DayCommitStats::default();
        for event in inner.events.values() {
            if event.kind != EventKind::Commit
                || event.actor != username
                || event.occurred_at < day_start
                || event.occurred_at >= day_end
            {
                continue;
            }
            stats.total += 1;
            let hour = event.occurred_at.hour();
            if hour >= 22 || hour < 6 {
                stats.night += 1;
            }
            if (5..9).contains(&hour) {
                stats.early += 1;
            }
            if let EventPayload::Commit { message, .. } = &event.payload.0 {
                stats.longest_message = stats
                    .longest_message
                    .max(message.chars().count() as i64);
            }
        }
        Ok(stats)
    }

    async fn week_commit_stats(
        &self,
        username: &str,
        day: Date,
    ) -> Result<WeekCommitStats, StoreError> {
        let week = week_index(day);
        let inner = self.inner.lock().await;
        let mut stats = WeekCommitStats::default();
        let mut weekday_days: HashSet<Date> = HashSet::new();
        for event in inner.events.values() {
            if event.kind != EventKind::Commit
                || event.actor != username
                || week_index(event.occurred_at.date()) != week
            {
                continue;
            }
            stats.total += 1;
            let date = event.occurred_at.date();
            match date.weekday() {
                time::Weekday::Saturday | time::Weekday::Sunday => stats.weekend += 1,
                _ => {
                    weekday_days.insert(date);
                }
            }
        }
        stats.weekday_days = weekday_days.len() as i64;
        Ok(stats)
    }

    async fn month_commit_stats(
        &self,
        username: &str,
        day: Date,
    ) -> Result<MonthCommitStats, StoreError> {
        let month = month_index(day);
        let inner = self.inner.lock().await;
        let mut stats = MonthCommitStats::default();
        let mut active_days: HashSet<Date> = HashSet::new();
        for event in inner.events.values() {
            if event.actor != username || month_index(event.occurred_at.date()) != month {
                continue;
            }
            match (event.kind, &event.payload.0) {
                (EventKind::Commit, _) => {
                    stats.total += 1;
                    active_days.insert(event.occurred_at.date());
                }
                (EventKind::PullRequest, EventPayload::PullRequest { action, .. })
                    if action == "opened" =>
                {
                    stats.opened_pull_requests += 1;
                }
                _ => {}
            }
        }
        stats.active_days = active_days.len() as i64;
        Ok(stats)
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn get_cursor(&self, source: &str) -> Result<Option<FeedPosition>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.cursors.get(source).cloned())
    }

    async fn advance_cursor(
        &self,
        source: &str,
        position: FeedPosition,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let merged = match inner.cursors.get(source) {
            Some(current) => current.merged_with(&position),
            None => position,
        };
        inner.cursors.insert(source.to_string(), merged);
        Ok(())
    }

    async fn get_watermark(&self, consumer: &str) -> Result<Option<Watermark>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.watermarks.get(consumer).cloned())
    }

    async fn advance_watermark(&self, consumer: &str, mark: Watermark) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.watermarks.get(consumer) {
            Some(current) if current.covers(mark.mark_at, &mark.mark_event) => {}
            _ => {
                inner.watermarks.insert(consumer.to_string(), mark);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn get_streak(
        &self,
        username: &str,
        kind: StreakKind,
    ) -> Result<Option<StreakRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.streaks.get(&(username.to_string(), kind)).cloned())
    }

    async fn put_streak(&self, record: StreakRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (record.username.clone(), record.kind);
        match inner.streaks.get_mut(&key) {
            Some(existing) => {
                existing.current_streak = record.current_streak;
                existing.longest_streak = existing.longest_streak.max(record.longest_streak);
                existing.last_period = existing.last_period.max(record.last_period);
            }
            None => {
                inner.streaks.insert(key, record);
            }
        }
        Ok(())
    }

    async fn grant_achievement(&self, grant: AchievementGrant) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (
            grant.username.clone(),
            grant.achievement.clone(),
            grant.period_kind.clone(),
            grant.period_key,
        );
        if inner.grants.contains_key(&key) {
            return Ok(false);
        }
        inner.grants.insert(key, grant);
        Ok(true)
    }
}

#[async_trait]
impl MarketStore for MemoryStore {
    async fn open_listing(&self, record: ListingRecord) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let key = record.key();
        if inner.listings.contains_key(&key) {
            return Ok(false);
        }
        inner.listings.insert(key, record);
        Ok(true)
    }

    async fn close_listing(&self, key: &ListingKey) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.listings.get_mut(key) {
            Some(listing) if listing.is_active => {
                listing.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_listing(&self, key: &ListingKey) -> Result<Option<ListingRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.listings.get(key).cloned())
    }

    async fn record_sale(&self, fact: SaleFact) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.sales.contains_key(&fact.event_id) {
            return Ok(false);
        }
        inner.sales.insert(fact.event_id.clone(), fact);
        Ok(true)
    }

    async fn record_delisting(&self, fact: DelistingFact) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.delistings.contains_key(&fact.event_id) {
            return Ok(false);
        }
        inner.delistings.insert(fact.event_id.clone(), fact);
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::activity_event::{EventPayload, ResourceRef};
    use time::macros::datetime;

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
    async fn duplicate_event_ids_insert_once() {
        let store = MemoryStore::new();
        let inserted = store
            .insert_events(vec![commit("a"), commit("a"), commit("b")])
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        let again = store.insert_events(vec![commit("a")]).await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn committed_order_is_strictly_monotonic() {
        let store = MemoryStore::new();
        store
            .insert_events(vec![commit("a"), commit("b"), commit("c")])
            .await
            .unwrap();
        let events = store.list_committed_after(None, 100).await.unwrap();
        assert_eq!(events.len(), 3);
        for pair in events.windows(2) {
            assert!(
                (pair[0].created_at, &pair[0].event_id)
                    < (pair[1].created_at, &pair[1].event_id)
            );
        }
    }

    #[tokio::test]
    async fn watermark_paging_resumes_without_replay() {
        let store = MemoryStore::new();
        store
            .insert_events(vec![commit("a"), commit("b"), commit("c")])
            .await
            .unwrap();
        let first = store.list_committed_after(None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let mark = first[1].watermark();
        let rest = store.list_committed_after(Some(&mark), 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].event_id, "c");
    }

    #[tokio::test]
    async fn mark_posted_is_effective_once() {
        let store = MemoryStore::new();
        store.insert_events(vec![commit("a")]).await.unwrap();
        let now = OffsetDateTime::now_utc();
        assert!(store.mark_posted("a", now).await.unwrap());
        assert!(!store.mark_posted("a", now).await.unwrap());
        let unposted = store
            .list_unposted(EventKind::Commit, 10, time::Duration::hours(12))
            .await
            .unwrap();
        assert!(unposted.is_empty());
    }

    #[tokio::test]
    async fn watermark_never_moves_backward() {
        let store = MemoryStore::new();
        let newer = Watermark {
            mark_at: datetime!(2025-03-01 11:00 UTC),
            mark_event: "b".to_string(),
        };
        let older = Watermark {
            mark_at: datetime!(2025-03-01 10:00 UTC),
            mark_event: "a".to_string(),
        };
        store.advance_watermark("stats-engine", newer.clone()).await.unwrap();
        store.advance_watermark("stats-engine", older).await.unwrap();
        assert_eq!(store.get_watermark("stats-engine").await.unwrap(), Some(newer));
    }
}

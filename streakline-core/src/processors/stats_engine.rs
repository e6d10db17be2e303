//! StatsEngine processor.
//!
//! Folds the committed event stream into per-user streak counters and
//! achievement grants, behind a processed-watermark so replays and restarts
//! are no-ops:
//! - streak updates compare calendar period indices (see `utils::period`),
//!   never raw timestamps
//! - achievement grants are keyed by (user, achievement, period), so the
//!   store refuses a second grant for the same period
//! - the watermark advances only after a whole batch is folded

use crate::config::StatsConfig;
use crate::entities::achievements::{
    AchievementGrant, AchievementId, DAILY_STREAK_MILESTONES, MONTHLY_STREAK_MILESTONES,
    WEEKLY_STREAK_MILESTONES,
};
use crate::entities::streaks::StreakRecord;
use crate::entities::{EventKind, StreakKind};
use crate::events::IngestTickReceiver;
use crate::store::{CursorStore, EventStore, StatsStore, StoreError};
use crate::utils::period::{day_index, month_index, period_index, week_index};
use std::collections::BTreeSet;
use std::sync::Arc;
use time::Date;
use tokio::sync::watch;
use tracing::{debug, info};

/// Watermark key of this consumer.
pub const STATS_CONSUMER: &str = "stats-engine";

/// Folds committed events into streaks and achievements.
pub struct StatsEngine<S> {
    store: Arc<S>,
    config: StatsConfig,
}

impl<S> StatsEngine<S>
where
    S: EventStore + CursorStore + StatsStore,
{
    pub fn new(store: Arc<S>, config: StatsConfig) -> Self {
        Self { store, config }
    }

    /// Fold one batch of committed events. Returns how many events were
    /// consumed (of any kind; only commits affect state).
    pub async fn fold_committed(&self) -> Result<u64, StoreError> {
        let mark = self.store.get_watermark(STATS_CONSUMER).await?;
        let events = self
            .store
            .list_committed_after(mark.as_ref(), self.config.batch_limit)
            .await?;
        let Some(last) = events.last() else {
            return Ok(0);
        };
        let next_mark = last.watermark();

        // Streaks fold per event; aggregate achievement checks run once per
        // period the batch touched, after all folding.
        let mut touched: BTreeSet<(String, Date)> = BTreeSet::new();
        let mut pr_touched: BTreeSet<(String, Date)> = BTreeSet::new();
        for event in &events {
            let date = event.occurred_at.date();
            match event.kind {
                EventKind::Commit => {
                    self.fold_streaks(&event.actor, date).await?;
                    touched.insert((event.actor.clone(), date));
                }
                EventKind::PullRequest => {
                    pr_touched.insert((event.actor.clone(), date));
                }
                _ => {}
            }
        }

        let mut checked_weeks: BTreeSet<(String, i64)> = BTreeSet::new();
        let mut checked_months: BTreeSet<(String, i64)> = BTreeSet::new();
        for (username, date) in &touched {
            self.check_daily_achievements(username, *date).await?;
            self.check_streak_milestones(username).await?;
            if checked_weeks.insert((username.clone(), week_index(*date))) {
                self.check_weekly_achievements(username, *date).await?;
            }
            if checked_months.insert((username.clone(), month_index(*date))) {
                self.check_monthly_achievements(username, *date).await?;
            }
        }
        // Pull requests count toward the monthly aggregates on their own.
        for (username, date) in &pr_touched {
            if checked_months.insert((username.clone(), month_index(*date))) {
                self.check_monthly_achievements(username, *date).await?;
            }
        }

        let consumed = events.len() as u64;
        self.store
            .advance_watermark(STATS_CONSUMER, next_mark)
            .await?;
        Ok(consumed)
    }

    async fn fold_streaks(&self, username: &str, date: Date) -> Result<(), StoreError> {
        for kind in StreakKind::ALL {
            let period = period_index(kind, date);
            let mut streak = self
                .store
                .get_streak(username, kind)
                .await?
                .unwrap_or_else(|| StreakRecord::new(username, kind));
            if streak.fold_period(period) {
                let current = streak.current_streak;
                debug!(username, kind = %kind, current, "Streak updated");
                self.store.put_streak(streak).await?;
                // Granted here, per folded day, so a catch-up batch that
                // spans several consecutive days credits each of them.
                if kind == StreakKind::Daily && current >= 2 {
                    self.record_grant(AchievementGrant::daily(
                        username,
                        AchievementId::StreakKeeper,
                        period,
                        serde_json::json!({ "streak": current }),
                    ))
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// One-time grants for streak thresholds across all three cadences.
    async fn check_streak_milestones(&self, username: &str) -> Result<(), StoreError> {
        let tiers: [(StreakKind, &[(AchievementId, i32)]); 3] = [
            (StreakKind::Daily, &DAILY_STREAK_MILESTONES),
            (StreakKind::Weekly, &WEEKLY_STREAK_MILESTONES),
            (StreakKind::Monthly, &MONTHLY_STREAK_MILESTONES),
        ];
        for (kind, milestones) in tiers {
            let Some(streak) = self.store.get_streak(username, kind).await? else {
                continue;
            };
            for &(achievement, threshold) in milestones {
                if streak.current_streak >= threshold {
                    let grant = AchievementGrant::milestone(username, achievement, threshold);
                    if self.store.grant_achievement(grant).await? {
                        info!(username, %achievement, threshold, "Streak milestone earned");
                    }
                }
            }
        }
        Ok(())
    }

    /// Repeatable per-day grants, re-checked idempotently as more commits
    /// for the same day arrive.
    async fn check_daily_achievements(
        &self,
        username: &str,
        date: Date,
    ) -> Result<(), StoreError> {
        let stats = self.store.day_commit_stats(username, date).await?;
        let day_key = day_index(date);
        let thresholds = &self.config.thresholds;

        if stats.night >= thresholds.night_owl {
            self.record_grant(AchievementGrant::daily(
                username,
                AchievementId::NightOwl,
                day_key,
                serde_json::json!({ "night_commits": stats.night }),
            ))
            .await?;
        }
        if stats.early >= thresholds.early_bird {
            self.record_grant(AchievementGrant::daily(
                username,
                AchievementId::EarlyBird,
                day_key,
                serde_json::json!({ "early_commits": stats.early }),
            ))
            .await?;
        }
        if stats.total >= thresholds.daily_dozen {
            self.record_grant(AchievementGrant::daily(
                username,
                AchievementId::DailyDozen,
                day_key,
                serde_json::json!({ "commits": stats.total }),
            ))
            .await?;
        }
        if stats.longest_message > thresholds.commit_poet_length {
            self.record_grant(AchievementGrant::daily(
                username,
                AchievementId::CommitPoet,
                day_key,
                serde_json::json!({ "message_length": stats.longest_message }),
            ))
            .await?;
        }
        Ok(())
    }

    /// Repeatable per-week grants, keyed by the Monday-aligned week index.
    async fn check_weekly_achievements(
        &self,
        username: &str,
        date: Date,
    ) -> Result<(), StoreError> {
        let stats = self.store.week_commit_stats(username, date).await?;
        let week_key = week_index(date);
        let thresholds = &self.config.thresholds;

        if stats.weekend >= thresholds.weekend_warrior {
            self.record_grant(AchievementGrant::weekly(
                username,
                AchievementId::WeekendWarrior,
                week_key,
                serde_json::json!({ "weekend_commits": stats.weekend }),
            ))
            .await?;
        }
        if stats.weekday_days >= thresholds.weekday_grind_days {
            self.record_grant(AchievementGrant::weekly(
                username,
                AchievementId::WeekdayGrind,
                week_key,
                serde_json::json!({ "weekdays": stats.weekday_days }),
            ))
            .await?;
        }
        if stats.total >= thresholds.productive_week {
            self.record_grant(AchievementGrant::weekly(
                username,
                AchievementId::ProductiveWeek,
                week_key,
                serde_json::json!({ "commits": stats.total }),
            ))
            .await?;
        }
        Ok(())
    }

    /// Repeatable per-month grants, keyed by the calendar month index.
    async fn check_monthly_achievements(
        &self,
        username: &str,
        date: Date,
    ) -> Result<(), StoreError> {
        let stats = self.store.month_commit_stats(username, date).await?;
        let month_key = month_index(date);
        let thresholds = &self.config.thresholds;

        if stats.total >= thresholds.century_month {
            self.record_grant(AchievementGrant::monthly(
                username,
                AchievementId::CenturyMonth,
                month_key,
                serde_json::json!({ "commits": stats.total }),
            ))
            .await?;
        }
        if stats.opened_pull_requests >= thresholds.pr_machine {
            self.record_grant(AchievementGrant::monthly(
                username,
                AchievementId::PrMachine,
                month_key,
                serde_json::json!({ "pull_requests": stats.opened_pull_requests }),
            ))
            .await?;
        }
        if stats.active_days >= thresholds.consistency_king_days {
            self.record_grant(AchievementGrant::monthly(
                username,
                AchievementId::ConsistencyKing,
                month_key,
                serde_json::json!({ "active_days": stats.active_days }),
            ))
            .await?;
        }
        Ok(())
    }

    async fn record_grant(&self, grant: AchievementGrant) -> Result<(), StoreError> {
        let (username, achievement, period_key) = (
            grant.username.clone(),
            grant.achievement.clone(),
            grant.period_key,
        );
        if self.store.grant_achievement(grant).await? {
            info!(%username, %achievement, period_key, "Achievement earned");
        }
        Ok(())
    }
}

/// Runner for a [`StatsEngine`]: folds after every `IngestTick`, draining
/// until the watermark catches up with the committed stream.
pub struct StatsEngineRunner<S> {
    engine: StatsEngine<S>,
    ingest_rx: IngestTickReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S> StatsEngineRunner<S>
where
    S: EventStore + CursorStore + StatsStore,
{
    pub fn new(
        engine: StatsEngine<S>,
        ingest_rx: IngestTickReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            ingest_rx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!("StatsEngineRunner started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("StatsEngineRunner received shutdown signal");
                        break;
                    }
                }

                Some(tick) = self.ingest_rx.recv() => {
                    debug!(source = %tick.source, "Received IngestTick");
                    loop {
                        match self.engine.fold_committed().await {
                            Ok(0) => break,
                            Ok(consumed) => {
                                debug!(consumed, "Folded committed events");
                            }
                            Err(error) => {
                                // Watermark did not advance; next tick retries.
                                tracing::error!(%error, "Stats fold failed");
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

        info!("StatsEngineRunner shutdown complete");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::activity_event::{EventPayload, NewActivityEvent, ResourceRef};
    use crate::store::memory::MemoryStore;
    use time::macros::{date, datetime};
    use time::OffsetDateTime;

    fn commit_at(id: &str, occurred_at: OffsetDateTime) -> NewActivityEvent {
        commit_with_message(id, occurred_at, "fix parser")
    }

    fn commit_with_message(
        id: &str,
        occurred_at: OffsetDateTime,
        message: &str,
    ) -> NewActivityEvent {
        NewActivityEvent {
            event_id: id.to_string(),
            occurred_at,
            resource: ResourceRef::new("octocat", "hello-world"),
            actor: "octocat".to_string(),
            actor_avatar: None,
            is_public: true,
            venue: None,
            native_event_id: None,
            payload: EventPayload::Commit {
                sha: id.to_string(),
                message: message.to_string(),
                branch: "main".to_string(),
                url: String::new(),
            },
        }
    }

    fn pr_opened(id: &str, occurred_at: OffsetDateTime) -> NewActivityEvent {
        let mut event = commit_at(id, occurred_at);
        event.payload = EventPayload::PullRequest {
            number: 1,
            action: "opened".to_string(),
            title: None,
            merged: false,
        };
        event
    }

    fn engine(store: Arc<MemoryStore>) -> StatsEngine<MemoryStore> {
        StatsEngine::new(store, StatsConfig::default())
    }

    async fn daily_streak(store: &MemoryStore) -> StreakRecord {
        store
            .get_streak("octocat", StreakKind::Daily)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn three_consecutive_days_build_a_streak_of_three() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_events(vec![
                commit_at("a", datetime!(2025-03-01 12:00 UTC)),
                commit_at("b", datetime!(2025-03-02 12:00 UTC)),
                commit_at("c", datetime!(2025-03-03 12:00 UTC)),
            ])
            .await
            .unwrap();
        engine(store.clone()).fold_committed().await.unwrap();
        let streak = daily_streak(&store).await;
        assert_eq!(streak.current_streak, 3);
        assert_eq!(streak.longest_streak, 3);
    }

    #[tokio::test]
    async fn same_day_commits_are_idempotent_for_the_streak() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_events(vec![
                commit_at("a", datetime!(2025-03-01 09:00 UTC)),
                commit_at("b", datetime!(2025-03-01 15:00 UTC)),
                commit_at("c", datetime!(2025-03-01 21:00 UTC)),
            ])
            .await
            .unwrap();
        engine(store.clone()).fold_committed().await.unwrap();
        assert_eq!(daily_streak(&store).await.current_streak, 1);
    }

    #[tokio::test]
    async fn gap_resets_current_but_keeps_longest() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_events(vec![
                commit_at("a", datetime!(2025-03-01 12:00 UTC)),
                commit_at("b", datetime!(2025-03-02 12:00 UTC)),
                commit_at("c", datetime!(2025-03-03 12:00 UTC)),
                commit_at("d", datetime!(2025-03-07 12:00 UTC)),
            ])
            .await
            .unwrap();
        engine(store.clone()).fold_committed().await.unwrap();
        let streak = daily_streak(&store).await;
        assert_eq!(streak.current_streak, 1);
        assert_eq!(streak.longest_streak, 3);
    }

    #[tokio::test]
    async fn second_fold_is_a_watermarked_no_op() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_events(vec![
                commit_at("a", datetime!(2025-03-01 12:00 UTC)),
                commit_at("b", datetime!(2025-03-02 12:00 UTC)),
            ])
            .await
            .unwrap();
        let engine = engine(store.clone());
        assert_eq!(engine.fold_committed().await.unwrap(), 2);
        assert_eq!(engine.fold_committed().await.unwrap(), 0);
        assert_eq!(daily_streak(&store).await.current_streak, 2);
    }

    #[tokio::test]
    async fn twelve_commits_in_a_day_earn_daily_dozen_once() {
        let store = Arc::new(MemoryStore::new());
        let events: Vec<_> = (0..12)
            .map(|i| commit_at(&format!("c{i}"), datetime!(2025-03-01 12:00 UTC)))
            .collect();
        store.insert_events(events).await.unwrap();
        let engine = engine(store.clone());
        engine.fold_committed().await.unwrap();

        // More commits on the same day re-check but never re-grant.
        store
            .insert_events(vec![commit_at("c99", datetime!(2025-03-01 13:00 UTC))])
            .await
            .unwrap();
        engine.fold_committed().await.unwrap();

        let dozen: Vec<_> = store
            .all_grants()
            .await
            .into_iter()
            .filter(|g| g.achievement == "daily_dozen")
            .collect();
        assert_eq!(dozen.len(), 1);
    }

    #[tokio::test]
    async fn night_commits_earn_night_owl() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_events(vec![
                commit_at("a", datetime!(2025-03-01 23:00 UTC)),
                commit_at("b", datetime!(2025-03-01 23:30 UTC)),
                commit_at("c", datetime!(2025-03-01 02:00 UTC)),
            ])
            .await
            .unwrap();
        engine(store.clone()).fold_committed().await.unwrap();
        assert!(
            store
                .all_grants()
                .await
                .iter()
                .any(|g| g.achievement == "night_owl")
        );
    }

    #[tokio::test]
    async fn long_commit_message_earns_commit_poet() {
        let store = Arc::new(MemoryStore::new());
        let message = "a".repeat(120);
        store
            .insert_events(vec![commit_with_message(
                "a",
                datetime!(2025-03-01 12:00 UTC),
                &message,
            )])
            .await
            .unwrap();
        engine(store.clone()).fold_committed().await.unwrap();
        assert!(
            store
                .all_grants()
                .await
                .iter()
                .any(|g| g.achievement == "commit_poet")
        );
    }

    #[tokio::test]
    async fn seventh_consecutive_day_earns_fire_starter() {
        let store = Arc::new(MemoryStore::new());
        // Seed a 6-day streak ending the day before.
        let mut seeded = StreakRecord::new("octocat", StreakKind::Daily);
        seeded.current_streak = 6;
        seeded.longest_streak = 6;
        seeded.last_period = Some(day_index(time::macros::date!(2025 - 03 - 06)));
        store.put_streak(seeded).await.unwrap();

        store
            .insert_events(vec![commit_at("a", datetime!(2025-03-07 12:00 UTC))])
            .await
            .unwrap();
        engine(store.clone()).fold_committed().await.unwrap();

        let grants = store.all_grants().await;
        assert!(grants.iter().any(|g| g.achievement == "fire_starter"));
        assert!(grants.iter().any(|g| g.achievement == "streak_keeper"));
        assert!(!grants.iter().any(|g| g.achievement == "lightning"));
    }

    #[tokio::test]
    async fn catch_up_batch_credits_streak_keeper_for_each_day() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_events(vec![
                commit_at("a", datetime!(2025-03-01 12:00 UTC)),
                commit_at("b", datetime!(2025-03-02 12:00 UTC)),
                commit_at("c", datetime!(2025-03-03 12:00 UTC)),
            ])
            .await
            .unwrap();
        engine(store.clone()).fold_committed().await.unwrap();

        // Day one only starts the streak; days two and three each keep it.
        let mut keepers: Vec<_> = store
            .all_grants()
            .await
            .into_iter()
            .filter(|g| g.achievement == "streak_keeper")
            .map(|g| g.period_key)
            .collect();
        keepers.sort_unstable();
        assert_eq!(
            keepers,
            vec![
                day_index(date!(2025 - 03 - 02)),
                day_index(date!(2025 - 03 - 03)),
            ]
        );
    }

    #[tokio::test]
    async fn ten_weekend_commits_earn_weekend_warrior() {
        // 2025-03-01 is a Saturday, 2025-03-02 the Sunday after it.
        let store = Arc::new(MemoryStore::new());
        let mut events: Vec<_> = (0..6)
            .map(|i| commit_at(&format!("sat{i}"), datetime!(2025-03-01 12:00 UTC)))
            .collect();
        events.extend(
            (0..4).map(|i| commit_at(&format!("sun{i}"), datetime!(2025-03-02 12:00 UTC))),
        );
        store.insert_events(events).await.unwrap();
        engine(store.clone()).fold_committed().await.unwrap();
        assert!(
            store
                .all_grants()
                .await
                .iter()
                .any(|g| g.achievement == "weekend_warrior" && g.period_kind == "weekly")
        );
    }

    #[tokio::test]
    async fn commits_on_all_five_weekdays_earn_weekday_grind() {
        // 2025-03-03 through 2025-03-07 are Monday through Friday.
        let store = Arc::new(MemoryStore::new());
        let weekdays = [
            datetime!(2025-03-03 12:00 UTC),
            datetime!(2025-03-04 12:00 UTC),
            datetime!(2025-03-05 12:00 UTC),
            datetime!(2025-03-06 12:00 UTC),
            datetime!(2025-03-07 12:00 UTC),
        ];
        let events: Vec<_> = weekdays
            .iter()
            .enumerate()
            .map(|(i, ts)| commit_at(&format!("d{i}"), *ts))
            .collect();
        store.insert_events(events).await.unwrap();
        engine(store.clone()).fold_committed().await.unwrap();
        assert!(
            store
                .all_grants()
                .await
                .iter()
                .any(|g| g.achievement == "weekday_grind")
        );
    }

    #[tokio::test]
    async fn ten_opened_pull_requests_earn_pr_machine() {
        let store = Arc::new(MemoryStore::new());
        let events: Vec<_> = (0..10)
            .map(|i| pr_opened(&format!("pr{i}"), datetime!(2025-03-10 12:00 UTC)))
            .collect();
        store.insert_events(events).await.unwrap();
        engine(store.clone()).fold_committed().await.unwrap();
        assert!(
            store
                .all_grants()
                .await
                .iter()
                .any(|g| g.achievement == "pr_machine" && g.period_kind == "monthly")
        );
    }

    #[tokio::test]
    async fn fourth_consecutive_week_earns_weekly_consistent() {
        let store = Arc::new(MemoryStore::new());
        // Seed a 3-week streak ending the previous week.
        let mut seeded = StreakRecord::new("octocat", StreakKind::Weekly);
        seeded.current_streak = 3;
        seeded.longest_streak = 3;
        seeded.last_period = Some(week_index(date!(2025 - 03 - 03)));
        store.put_streak(seeded).await.unwrap();

        store
            .insert_events(vec![commit_at("a", datetime!(2025-03-10 12:00 UTC))])
            .await
            .unwrap();
        engine(store.clone()).fold_committed().await.unwrap();

        let grants = store.all_grants().await;
        assert!(grants.iter().any(|g| g.achievement == "weekly_consistent"));
        assert!(!grants.iter().any(|g| g.achievement == "weekly_quarter"));
    }
}

//! Achievement definitions and grant records.
//!
//! A grant is an immutable fact keyed by (username, achievement,
//! period_kind, period_key); the primary key is what enforces
//! exactly-once-per-period under replayed ingestion.

use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use serde::Deserialize;
use sqlx::types::Json;
use time::OffsetDateTime;

/// Identifiers of the built-in achievement catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AchievementId {
    /// Commits between 22:00 and 06:00.
    NightOwl,
    /// Commits between 05:00 and 09:00.
    EarlyBird,
    /// Threshold of commits in a single day.
    DailyDozen,
    /// Any commit on a day with an active streak.
    StreakKeeper,
    /// A commit message longer than 100 characters.
    CommitPoet,
    /// Threshold of weekend commits in one week.
    WeekendWarrior,
    /// Commits on every weekday, Monday through Friday.
    WeekdayGrind,
    /// Threshold of commits in one week.
    ProductiveWeek,
    /// Threshold of commits in one month.
    CenturyMonth,
    /// Threshold of pull requests opened in one month.
    PrMachine,
    /// Commits on a threshold of distinct days in one month.
    ConsistencyKing,
    /// 7-day streak milestone.
    FireStarter,
    /// 30-day streak milestone.
    Lightning,
    /// 100-day streak milestone.
    Diamond,
    /// 365-day streak milestone.
    Legend,
    /// 4-week streak milestone.
    WeeklyConsistent,
    /// 13-week streak milestone.
    WeeklyQuarter,
    /// 3-month streak milestone.
    MonthlyTri,
    /// 6-month streak milestone.
    MonthlyHalf,
    /// 12-month streak milestone.
    MonthlyAnnual,
}

impl AchievementId {
    pub fn as_str(self) -> &'static str {
        match self {
            AchievementId::NightOwl => "night_owl",
            AchievementId::EarlyBird => "early_bird",
            AchievementId::DailyDozen => "daily_dozen",
            AchievementId::StreakKeeper => "streak_keeper",
            AchievementId::CommitPoet => "commit_poet",
            AchievementId::WeekendWarrior => "weekend_warrior",
            AchievementId::WeekdayGrind => "weekday_grind",
            AchievementId::ProductiveWeek => "productive_week",
            AchievementId::CenturyMonth => "century_month",
            AchievementId::PrMachine => "pr_machine",
            AchievementId::ConsistencyKing => "consistency_king",
            AchievementId::FireStarter => "fire_starter",
            AchievementId::Lightning => "lightning",
            AchievementId::Diamond => "diamond",
            AchievementId::Legend => "legend",
            AchievementId::WeeklyConsistent => "weekly_consistent",
            AchievementId::WeeklyQuarter => "weekly_quarter",
            AchievementId::MonthlyTri => "monthly_tri",
            AchievementId::MonthlyHalf => "monthly_half",
            AchievementId::MonthlyAnnual => "monthly_annual",
        }
    }
}

impl std::fmt::Display for AchievementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Daily-streak milestones: granted once per threshold, ever.
pub const DAILY_STREAK_MILESTONES: [(AchievementId, i32); 4] = [
    (AchievementId::FireStarter, 7),
    (AchievementId::Lightning, 30),
    (AchievementId::Diamond, 100),
    (AchievementId::Legend, 365),
];

/// Weekly-streak milestones.
pub const WEEKLY_STREAK_MILESTONES: [(AchievementId, i32); 2] = [
    (AchievementId::WeeklyConsistent, 4),
    (AchievementId::WeeklyQuarter, 13),
];

/// Monthly-streak milestones.
pub const MONTHLY_STREAK_MILESTONES: [(AchievementId, i32); 3] = [
    (AchievementId::MonthlyTri, 3),
    (AchievementId::MonthlyHalf, 6),
    (AchievementId::MonthlyAnnual, 12),
];

/// Tunable thresholds for the repeatable achievements.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AchievementThresholds {
    pub night_owl: i64,
    pub early_bird: i64,
    pub daily_dozen: i64,
    pub commit_poet_length: i64,
    pub weekend_warrior: i64,
    /// Distinct weekdays with commits; 5 means the full working week.
    pub weekday_grind_days: i64,
    pub productive_week: i64,
    pub century_month: i64,
    pub pr_machine: i64,
    /// Distinct days with commits in one month.
    pub consistency_king_days: i64,
}

impl Default for AchievementThresholds {
    fn default() -> Self {
        Self {
            night_owl: 3,
            early_bird: 3,
            daily_dozen: 12,
            commit_poet_length: 100,
            weekend_warrior: 10,
            weekday_grind_days: 5,
            productive_week: 25,
            century_month: 100,
            pr_machine: 10,
            consistency_king_days: 20,
        }
    }
}

/// An earned achievement, ready to be recorded.
#[derive(Debug, Clone)]
pub struct AchievementGrant {
    pub username: String,
    pub achievement: String,
    /// "daily", "weekly" or "monthly" for repeatable grants, "milestone"
    /// for one-time tiers.
    pub period_kind: String,
    /// Period index for repeatable grants, the threshold itself for
    /// milestones.
    pub period_key: i64,
    pub earned_at: OffsetDateTime,
    pub metadata: serde_json::Value,
}

impl AchievementGrant {
    fn repeatable(
        username: impl Into<String>,
        achievement: AchievementId,
        period_kind: &str,
        period_key: i64,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            username: username.into(),
            achievement: achievement.as_str().to_string(),
            period_kind: period_kind.to_string(),
            period_key,
            earned_at: OffsetDateTime::now_utc(),
            metadata,
        }
    }

    pub fn daily(
        username: impl Into<String>,
        achievement: AchievementId,
        day_key: i64,
        metadata: serde_json::Value,
    ) -> Self {
        Self::repeatable(username, achievement, "daily", day_key, metadata)
    }

    pub fn weekly(
        username: impl Into<String>,
        achievement: AchievementId,
        week_key: i64,
        metadata: serde_json::Value,
    ) -> Self {
        Self::repeatable(username, achievement, "weekly", week_key, metadata)
    }

    pub fn monthly(
        username: impl Into<String>,
        achievement: AchievementId,
        month_key: i64,
        metadata: serde_json::Value,
    ) -> Self {
        Self::repeatable(username, achievement, "monthly", month_key, metadata)
    }

    pub fn milestone(
        username: impl Into<String>,
        achievement: AchievementId,
        threshold: i32,
    ) -> Self {
        Self {
            username: username.into(),
            achievement: achievement.as_str().to_string(),
            period_kind: "milestone".to_string(),
            period_key: i64::from(threshold),
            earned_at: OffsetDateTime::now_utc(),
            metadata: serde_json::json!({ "threshold": threshold }),
        }
    }
}

#[derive(Debug, Clone)]
/// Record a grant if this period's grant does not already exist.
///
/// Returns whether a row was inserted; a duplicate is a normal outcome.
pub struct InsertAchievementGrant {
    pub grant: AchievementGrant,
}

impl Processor<InsertAchievementGrant> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertAchievementGrant")]
    async fn process(&self, cmd: InsertAchievementGrant) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO achievement_grants
                (username, achievement, period_kind, period_key, earned_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (username, achievement, period_kind, period_key) DO NOTHING
            "#,
        )
        .bind(&cmd.grant.username)
        .bind(&cmd.grant.achievement)
        .bind(&cmd.grant.period_kind)
        .bind(cmd.grant.period_key)
        .bind(cmd.grant.earned_at)
        .bind(Json(&cmd.grant.metadata))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

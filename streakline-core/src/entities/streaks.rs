//! Per-user streak counters.
//!
//! One row per (username, streak kind). `last_period` is the integer period
//! index of the most recent qualifying activity (see `utils::period`);
//! comparing indices instead of timestamps is what keeps replays and
//! out-of-order events from corrupting the counters.

use crate::entities::StreakKind;
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StreakRecord {
    pub username: String,
    pub kind: StreakKind,
    pub current_streak: i32,
    pub longest_streak: i32,
    pub last_period: Option<i64>,
}

impl StreakRecord {
    /// Fresh record for a user's first qualifying activity.
    pub fn new(username: impl Into<String>, kind: StreakKind) -> Self {
        Self {
            username: username.into(),
            kind,
            current_streak: 0,
            longest_streak: 0,
            last_period: None,
        }
    }

    /// Fold one qualifying activity period into the streak.
    ///
    /// Returns `true` if the record changed and needs to be written back:
    /// - activity in the period right after `last_period` extends the streak
    /// - activity in the same period is idempotent (no change)
    /// - activity after a gap, or the first ever, resets the streak to 1
    /// - activity in an *older* period never regresses `last_period`
    pub fn fold_period(&mut self, period: i64) -> bool {
        match self.last_period {
            Some(last) if period == last => false,
            Some(last) if period < last => false,
            Some(last) if period == last + 1 => {
                self.current_streak += 1;
                self.longest_streak = self.longest_streak.max(self.current_streak);
                self.last_period = Some(period);
                true
            }
            // Gap, or first activity.
            _ => {
                self.current_streak = 1;
                self.longest_streak = self.longest_streak.max(1);
                self.last_period = Some(period);
                true
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GetStreak {
    pub username: String,
    pub kind: StreakKind,
}

impl Processor<GetStreak> for DatabaseProcessor {
    type Output = Option<StreakRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetStreak")]
    async fn process(&self, query: GetStreak) -> Result<Option<StreakRecord>, sqlx::Error> {
        sqlx::query_as::<_, StreakRecord>(
            r#"
            SELECT username, kind, current_streak, longest_streak, last_period
            FROM streaks
            WHERE username = $1 AND kind = $2
            "#,
        )
        .bind(&query.username)
        .bind(query.kind)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Write back a folded streak record.
pub struct UpsertStreak {
    pub record: StreakRecord,
}

impl Processor<UpsertStreak> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpsertStreak")]
    async fn process(&self, cmd: UpsertStreak) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO streaks (username, kind, current_streak, longest_streak, last_period)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (username, kind) DO UPDATE SET
                current_streak = EXCLUDED.current_streak,
                longest_streak = GREATEST(streaks.longest_streak, EXCLUDED.longest_streak),
                last_period = GREATEST(streaks.last_period, EXCLUDED.last_period)
            "#,
        )
        .bind(&cmd.record.username)
        .bind(cmd.record.kind)
        .bind(cmd.record.current_streak)
        .bind(cmd.record.longest_streak)
        .bind(cmd.record.last_period)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daily(user: &str) -> StreakRecord {
        StreakRecord::new(user, StreakKind::Daily)
    }

    #[test]
    fn three_consecutive_days_build_a_streak_of_three() {
        let mut streak = daily("octocat");
        assert!(streak.fold_period(100));
        assert!(streak.fold_period(101));
        assert!(streak.fold_period(102));
        assert_eq!(streak.current_streak, 3);
        assert_eq!(streak.longest_streak, 3);
        assert_eq!(streak.last_period, Some(102));
    }

    #[test]
    fn same_period_activity_is_idempotent() {
        let mut streak = daily("octocat");
        streak.fold_period(100);
        streak.fold_period(101);
        streak.fold_period(102);
        assert!(!streak.fold_period(102));
        assert_eq!(streak.current_streak, 3);
    }

    #[test]
    fn gap_resets_current_but_keeps_longest() {
        let mut streak = daily("octocat");
        streak.fold_period(100);
        streak.fold_period(101);
        streak.fold_period(102);
        assert!(streak.fold_period(104));
        assert_eq!(streak.current_streak, 1);
        assert_eq!(streak.longest_streak, 3);
    }

    #[test]
    fn older_period_never_regresses_the_streak() {
        let mut streak = daily("octocat");
        streak.fold_period(100);
        streak.fold_period(101);
        // A delayed event from two periods back arrives late.
        assert!(!streak.fold_period(99));
        assert_eq!(streak.current_streak, 2);
        assert_eq!(streak.last_period, Some(101));
    }

    #[test]
    fn first_activity_starts_at_one() {
        let mut streak = daily("octocat");
        assert!(streak.fold_period(7));
        assert_eq!(streak.current_streak, 1);
        assert_eq!(streak.longest_streak, 1);
    }
}

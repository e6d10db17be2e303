//! The activity event envelope and its Postgres queries.
//!
//! Every feed normalizes into [`NewActivityEvent`]; one row per logical
//! event lives in `activity_events`. The `event_id` primary key is the sole
//! dedup arbiter, with an extra partial unique index on
//! `(resource_owner, resource_name, venue, native_event_id)` for
//! marketplace feeds that reuse or lack a stable global id. Rows are
//! immutable after insert except for the posted/posted_at delivery fields.

use crate::entities::EventKind;
use crate::entities::watermark::Watermark;
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use thiserror::Error;
use time::OffsetDateTime;

/// The resource an event belongs to: repository owner + name for
/// source-control events, chain + contract for marketplace events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub owner: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Kind-specific event data, stored as JSONB next to the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Commit {
        sha: String,
        message: String,
        branch: String,
        url: String,
    },
    PullRequest {
        number: i64,
        action: String,
        title: Option<String>,
        merged: bool,
    },
    Review {
        number: i64,
        action: String,
        state: String,
    },
    Issue {
        number: i64,
        action: String,
        title: Option<String>,
    },
    Release {
        tag: String,
        name: Option<String>,
        prerelease: bool,
    },
    Create {
        ref_type: String,
        ref_name: Option<String>,
    },
    Delete {
        ref_type: String,
        ref_name: String,
    },
    Fork {
        fork_owner: String,
        fork_name: String,
    },
    Star {
        action: String,
    },
    IssueComment {
        number: i64,
        action: String,
    },
    ReviewComment {
        number: i64,
        action: String,
    },
    CommitComment {
        sha: String,
    },
    Member {
        member: String,
        action: String,
    },
    Wiki {
        page: String,
        action: String,
    },
    Visibility {
        action: String,
    },
    Discussion {
        title: Option<String>,
        action: String,
    },
    Mint {
        token_id: String,
        to: String,
    },
    Transfer {
        token_id: String,
        from: String,
        to: String,
    },
    Burn {
        token_id: String,
        from: String,
    },
    Listing {
        listing_id: String,
        seller: String,
        price: Decimal,
        currency: String,
    },
    Sale {
        listing_id: Option<String>,
        seller: Option<String>,
        buyer: String,
        price: Decimal,
        currency: String,
    },
    Delisting {
        listing_id: String,
        seller: Option<String>,
    },
}

impl EventPayload {
    /// The event kind this payload belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Commit { .. } => EventKind::Commit,
            EventPayload::PullRequest { .. } => EventKind::PullRequest,
            EventPayload::Review { .. } => EventKind::Review,
            EventPayload::Issue { .. } => EventKind::Issue,
            EventPayload::Release { .. } => EventKind::Release,
            EventPayload::Create { .. } => EventKind::Create,
            EventPayload::Delete { .. } => EventKind::Delete,
            EventPayload::Fork { .. } => EventKind::Fork,
            EventPayload::Star { .. } => EventKind::Star,
            EventPayload::IssueComment { .. } => EventKind::IssueComment,
            EventPayload::ReviewComment { .. } => EventKind::ReviewComment,
            EventPayload::CommitComment { .. } => EventKind::CommitComment,
            EventPayload::Member { .. } => EventKind::Member,
            EventPayload::Wiki { .. } => EventKind::Wiki,
            EventPayload::Visibility { .. } => EventKind::Visibility,
            EventPayload::Discussion { .. } => EventKind::Discussion,
            EventPayload::Mint { .. } => EventKind::Mint,
            EventPayload::Transfer { .. } => EventKind::Transfer,
            EventPayload::Burn { .. } => EventKind::Burn,
            EventPayload::Listing { .. } => EventKind::Listing,
            EventPayload::Sale { .. } => EventKind::Sale,
            EventPayload::Delisting { .. } => EventKind::Delisting,
        }
    }
}

/// A normalized event as produced by a feed, before it has been persisted.
#[derive(Debug, Clone)]
pub struct NewActivityEvent {
    /// Globally unique, stable id from the source feed. Sole dedup key.
    pub event_id: String,
    /// When the event occurred at the source (not when we ingested it).
    pub occurred_at: OffsetDateTime,
    pub resource: ResourceRef,
    /// Username or address of the principal who caused the event.
    pub actor: String,
    pub actor_avatar: Option<String>,
    pub is_public: bool,
    /// Marketplace name, `None` for source-control events.
    pub venue: Option<String>,
    /// Venue-native event id; unique per (resource, venue).
    pub native_event_id: Option<String>,
    pub payload: EventPayload,
}

/// A single record failed validation and must be skipped, not fail the batch.
#[derive(Debug, Error)]
pub enum InvalidEvent {
    #[error("event is missing its event_id")]
    MissingEventId,
    #[error("event {0} is missing its actor")]
    MissingActor(String),
    #[error("marketplace event {0} is missing venue or native id")]
    MissingVenue(String),
}

impl NewActivityEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Rejects records a broken upstream produced without required fields.
    pub fn validate(&self) -> Result<(), InvalidEvent> {
        if self.event_id.is_empty() {
            return Err(InvalidEvent::MissingEventId);
        }
        if self.actor.is_empty() {
            return Err(InvalidEvent::MissingActor(self.event_id.clone()));
        }
        if self.kind().is_marketplace() && (self.venue.is_none() || self.native_event_id.is_none())
        {
            return Err(InvalidEvent::MissingVenue(self.event_id.clone()));
        }
        Ok(())
    }
}

/// A persisted activity event.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActivityEvent {
    pub event_id: String,
    pub kind: EventKind,
    pub occurred_at: OffsetDateTime,
    pub resource_owner: String,
    pub resource_name: String,
    pub actor: String,
    pub actor_avatar: Option<String>,
    pub is_public: bool,
    pub venue: Option<String>,
    pub native_event_id: Option<String>,
    pub payload: Json<EventPayload>,
    pub posted: bool,
    pub posted_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl ActivityEvent {
    pub fn resource(&self) -> ResourceRef {
        ResourceRef::new(self.resource_owner.clone(), self.resource_name.clone())
    }

    /// The watermark position of this event in the committed stream.
    pub fn watermark(&self) -> Watermark {
        Watermark {
            mark_at: self.created_at,
            mark_event: self.event_id.clone(),
        }
    }
}

/// Per-user commit counts for one UTC day, used by achievement checks.
#[derive(Debug, Clone, Copy, Default, sqlx::FromRow)]
pub struct DayCommitStats {
    pub total: i64,
    /// Commits between 22:00 and 06:00.
    pub night: i64,
    /// Commits between 05:00 and 09:00.
    pub early: i64,
    pub longest_message: i64,
}

/// Per-user commit counts for one Monday-aligned week.
#[derive(Debug, Clone, Copy, Default, sqlx::FromRow)]
pub struct WeekCommitStats {
    pub total: i64,
    /// Commits made on Saturday or Sunday.
    pub weekend: i64,
    /// Distinct weekdays (Monday through Friday) with at least one commit.
    pub weekday_days: i64,
}

/// Per-user activity counts for one calendar month.
#[derive(Debug, Clone, Copy, Default, sqlx::FromRow)]
pub struct MonthCommitStats {
    pub total: i64,
    /// Distinct days with at least one commit.
    pub active_days: i64,
    /// Pull requests opened during the month.
    pub opened_pull_requests: i64,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
/// Insert a batch of events, ignoring every row already known.
///
/// `ON CONFLICT DO NOTHING` covers both the `event_id` primary key and the
/// partial marketplace unique index; a duplicate is a normal outcome, never
/// an error. Returns the number of rows actually inserted.
pub struct InsertActivityEvents {
    pub events: Vec<NewActivityEvent>,
}

impl Processor<InsertActivityEvents> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertActivityEvents")]
    async fn process(&self, insert: InsertActivityEvents) -> Result<u64, sqlx::Error> {
        if insert.events.is_empty() {
            return Ok(0);
        }

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO activity_events \
            (event_id, kind, occurred_at, resource_owner, resource_name, actor, \
            actor_avatar, is_public, venue, native_event_id, payload) ",
        );

        query_builder.push_values(insert.events, |mut b, event| {
            let kind = event.kind();
            b.push_bind(event.event_id)
                .push_bind(kind)
                .push_bind(event.occurred_at)
                .push_bind(event.resource.owner)
                .push_bind(event.resource.name)
                .push_bind(event.actor)
                .push_bind(event.actor_avatar)
                .push_bind(event.is_public)
                .push_bind(event.venue)
                .push_bind(event.native_event_id)
                .push_bind(Json(event.payload));
        });

        query_builder.push(" ON CONFLICT DO NOTHING");

        let result = query_builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Fetch undelivered events of one kind, oldest ingested first.
///
/// The `max_age` window bounds redelivery after a long outage so the
/// channel is not flooded with stale notifications.
pub struct ListUnpostedEvents {
    pub kind: EventKind,
    pub limit: i64,
    pub max_age: time::Duration,
}

impl Processor<ListUnpostedEvents> for DatabaseProcessor {
    type Output = Vec<ActivityEvent>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListUnpostedEvents")]
    async fn process(&self, query: ListUnpostedEvents) -> Result<Vec<ActivityEvent>, sqlx::Error> {
        let horizon = OffsetDateTime::now_utc() - query.max_age;
        sqlx::query_as::<_, ActivityEvent>(
            r#"
            SELECT *
            FROM activity_events
            WHERE kind = $1
              AND posted = FALSE
              AND created_at > $2
            ORDER BY created_at ASC, event_id ASC
            LIMIT $3
            "#,
        )
        .bind(query.kind)
        .bind(horizon)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Flip an event to posted, exactly once.
///
/// A second call finds `posted = TRUE` and affects zero rows; that is a
/// harmless no-op so at-least-once delivery retries stay cheap.
pub struct MarkEventPosted {
    pub event_id: String,
    pub posted_at: OffsetDateTime,
}

impl Processor<MarkEventPosted> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:MarkEventPosted")]
    async fn process(&self, cmd: MarkEventPosted) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE activity_events
            SET posted = TRUE, posted_at = $2
            WHERE event_id = $1 AND posted = FALSE
            "#,
        )
        .bind(&cmd.event_id)
        .bind(cmd.posted_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
/// Page through committed events strictly after a watermark, in the total
/// `(created_at, event_id)` order the watermark is defined over.
pub struct ListCommittedAfter {
    pub mark: Option<Watermark>,
    pub limit: i64,
}

impl Processor<ListCommittedAfter> for DatabaseProcessor {
    type Output = Vec<ActivityEvent>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListCommittedAfter")]
    async fn process(&self, query: ListCommittedAfter) -> Result<Vec<ActivityEvent>, sqlx::Error> {
        match query.mark {
            Some(mark) => {
                sqlx::query_as::<_, ActivityEvent>(
                    r#"
                    SELECT *
                    FROM activity_events
                    WHERE (created_at, event_id) > ($1, $2)
                    ORDER BY created_at ASC, event_id ASC
                    LIMIT $3
                    "#,
                )
                .bind(mark.mark_at)
                .bind(&mark.mark_event)
                .bind(query.limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, ActivityEvent>(
                    r#"
                    SELECT *
                    FROM activity_events
                    ORDER BY created_at ASC, event_id ASC
                    LIMIT $1
                    "#,
                )
                .bind(query.limit)
                .fetch_all(&self.pool)
                .await
            }
        }
    }
}

#[derive(Debug, Clone)]
/// Aggregate one user's commit counts for a single UTC day.
pub struct GetDayCommitStats {
    pub username: String,
    /// Midnight UTC of the day under inspection.
    pub day_start: OffsetDateTime,
}

impl Processor<GetDayCommitStats> for DatabaseProcessor {
    type Output = DayCommitStats;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDayCommitStats")]
    async fn process(&self, query: GetDayCommitStats) -> Result<DayCommitStats, sqlx::Error> {
        let day_end = query.day_start + time::Duration::days(1);
        sqlx::query_as::<_, DayCommitStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (
                    WHERE EXTRACT(HOUR FROM occurred_at AT TIME ZONE 'UTC') >= 22
                       OR EXTRACT(HOUR FROM occurred_at AT TIME ZONE 'UTC') < 6
                ) AS night,
                COUNT(*) FILTER (
                    WHERE EXTRACT(HOUR FROM occurred_at AT TIME ZONE 'UTC') >= 5
                      AND EXTRACT(HOUR FROM occurred_at AT TIME ZONE 'UTC') < 9
                ) AS early,
                COALESCE(MAX(char_length(payload->>'message')), 0)::bigint AS longest_message
            FROM activity_events
            WHERE kind = 'commit'
              AND actor = $1
              AND occurred_at >= $2
              AND occurred_at < $3
            "#,
        )
        .bind(&query.username)
        .bind(query.day_start)
        .bind(day_end)
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Aggregate one user's commit counts for the Monday-aligned week
/// containing `day_start`.
pub struct GetWeekCommitStats {
    pub username: String,
    /// Midnight UTC of any day inside the week.
    pub day_start: OffsetDateTime,
}

impl Processor<GetWeekCommitStats> for DatabaseProcessor {
    type Output = WeekCommitStats;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetWeekCommitStats")]
    async fn process(&self, query: GetWeekCommitStats) -> Result<WeekCommitStats, sqlx::Error> {
        sqlx::query_as::<_, WeekCommitStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (
                    WHERE EXTRACT(ISODOW FROM occurred_at AT TIME ZONE 'UTC') >= 6
                ) AS weekend,
                COUNT(DISTINCT (occurred_at AT TIME ZONE 'UTC')::date) FILTER (
                    WHERE EXTRACT(ISODOW FROM occurred_at AT TIME ZONE 'UTC') <= 5
                ) AS weekday_days
            FROM activity_events
            WHERE kind = 'commit'
              AND actor = $1
              AND date_trunc('week', occurred_at AT TIME ZONE 'UTC')
                  = date_trunc('week', $2 AT TIME ZONE 'UTC')
            "#,
        )
        .bind(&query.username)
        .bind(query.day_start)
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Aggregate one user's commit and pull-request counts for the calendar
/// month containing `day_start`.
pub struct GetMonthCommitStats {
    pub username: String,
    /// Midnight UTC of any day inside the month.
    pub day_start: OffsetDateTime,
}

impl Processor<GetMonthCommitStats> for DatabaseProcessor {
    type Output = MonthCommitStats;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetMonthCommitStats")]
    async fn process(&self, query: GetMonthCommitStats) -> Result<MonthCommitStats, sqlx::Error> {
        sqlx::query_as::<_, MonthCommitStats>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE kind = 'commit') AS total,
                COUNT(DISTINCT (occurred_at AT TIME ZONE 'UTC')::date) FILTER (
                    WHERE kind = 'commit'
                ) AS active_days,
                COUNT(*) FILTER (
                    WHERE kind = 'pull_request' AND payload->>'action' = 'opened'
                ) AS opened_pull_requests
            FROM activity_events
            WHERE actor = $1
              AND kind IN ('commit', 'pull_request')
              AND date_trunc('month', occurred_at AT TIME ZONE 'UTC')
                  = date_trunc('month', $2 AT TIME ZONE 'UTC')
            "#,
        )
        .bind(&query.username)
        .bind(query.day_start)
        .fetch_one(&self.pool)
        .await
    }
}

//! Per-source poll cursors.
//!
//! A cursor records how far a source feed has been consumed. It is read at
//! the start of every poll cycle and advanced only after the whole fetched
//! batch has been durably persisted, so a crash between fetch and persist
//! only causes a re-fetch that the event store deduplicates.

use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use time::OffsetDateTime;

/// Opaque position in a source feed: a timestamp, a pagination token, or
/// both, depending on what the source supports.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedPosition {
    pub last_seen_at: Option<OffsetDateTime>,
    pub page_token: Option<String>,
}

impl FeedPosition {
    pub fn at(ts: OffsetDateTime) -> Self {
        Self {
            last_seen_at: Some(ts),
            page_token: None,
        }
    }

    /// Merge a newly observed position without ever moving backward.
    ///
    /// Timestamps are compared; a source returning data older than the
    /// stored cursor (clock skew, feed reordering) must not regress it.
    /// A newly observed token always replaces the stored one, exactly like
    /// the `COALESCE(EXCLUDED.page_token, ...)` upsert, so pagination keeps
    /// moving even while the newest timestamp stalls across cycles.
    pub fn merged_with(&self, observed: &FeedPosition) -> FeedPosition {
        let last_seen_at = match (self.last_seen_at, observed.last_seen_at) {
            (Some(current), Some(new)) => Some(current.max(new)),
            (current, new) => new.or(current),
        };
        FeedPosition {
            last_seen_at,
            page_token: observed
                .page_token
                .clone()
                .or_else(|| self.page_token.clone()),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedCursorRow {
    last_seen_at: Option<OffsetDateTime>,
    page_token: Option<String>,
}

#[derive(Debug, Clone)]
/// Read the stored cursor for a source, if the source has ever been polled.
pub struct GetFeedCursor {
    pub source: String,
}

impl Processor<GetFeedCursor> for DatabaseProcessor {
    type Output = Option<FeedPosition>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetFeedCursor")]
    async fn process(&self, query: GetFeedCursor) -> Result<Option<FeedPosition>, sqlx::Error> {
        let row = sqlx::query_as::<_, FeedCursorRow>(
            r#"
            SELECT last_seen_at, page_token
            FROM feed_cursors
            WHERE source = $1
            "#,
        )
        .bind(&query.source)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| FeedPosition {
            last_seen_at: r.last_seen_at,
            page_token: r.page_token,
        }))
    }
}

#[derive(Debug, Clone)]
/// Advance a source cursor, monotonically.
///
/// `GREATEST` keeps the stored timestamp from moving backward even if two
/// poller instances race or a cycle observed out-of-order data.
pub struct AdvanceFeedCursor {
    pub source: String,
    pub position: FeedPosition,
}

impl Processor<AdvanceFeedCursor> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:AdvanceFeedCursor")]
    async fn process(&self, cmd: AdvanceFeedCursor) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO feed_cursors (source, last_seen_at, page_token, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (source) DO UPDATE SET
                last_seen_at = GREATEST(feed_cursors.last_seen_at, EXCLUDED.last_seen_at),
                page_token = COALESCE(EXCLUDED.page_token, feed_cursors.page_token),
                updated_at = NOW()
            "#,
        )
        .bind(&cmd.source)
        .bind(cmd.position.last_seen_at)
        .bind(&cmd.position.page_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn merge_advances_to_newer_timestamp() {
        let current = FeedPosition::at(datetime!(2025-03-01 10:00 UTC));
        let observed = FeedPosition::at(datetime!(2025-03-01 11:00 UTC));
        let merged = current.merged_with(&observed);
        assert_eq!(merged.last_seen_at, Some(datetime!(2025-03-01 11:00 UTC)));
    }

    #[test]
    fn merge_never_moves_backward() {
        let current = FeedPosition::at(datetime!(2025-03-01 10:00 UTC));
        let stale = FeedPosition::at(datetime!(2025-02-28 09:00 UTC));
        let merged = current.merged_with(&stale);
        assert_eq!(merged.last_seen_at, Some(datetime!(2025-03-01 10:00 UTC)));
    }

    #[test]
    fn merge_takes_new_token_when_timestamp_stalls() {
        let current = FeedPosition {
            last_seen_at: Some(datetime!(2025-03-01 10:00 UTC)),
            page_token: Some("page-1".to_string()),
        };
        let observed = FeedPosition {
            last_seen_at: Some(datetime!(2025-03-01 10:00 UTC)),
            page_token: Some("page-2".to_string()),
        };
        let merged = current.merged_with(&observed);
        assert_eq!(merged.last_seen_at, Some(datetime!(2025-03-01 10:00 UTC)));
        assert_eq!(merged.page_token.as_deref(), Some("page-2"));
    }

    #[test]
    fn merge_keeps_stored_token_when_none_observed() {
        let current = FeedPosition {
            last_seen_at: Some(datetime!(2025-03-01 10:00 UTC)),
            page_token: Some("page-1".to_string()),
        };
        let merged = current.merged_with(&FeedPosition::at(datetime!(2025-03-01 11:00 UTC)));
        assert_eq!(merged.last_seen_at, Some(datetime!(2025-03-01 11:00 UTC)));
        assert_eq!(merged.page_token.as_deref(), Some("page-1"));
    }

    #[test]
    fn merge_from_empty_takes_observed() {
        let merged = FeedPosition::default().merged_with(&FeedPosition {
            last_seen_at: Some(datetime!(2025-03-01 10:00 UTC)),
            page_token: Some("cursor-token".to_string()),
        });
        assert_eq!(merged.last_seen_at, Some(datetime!(2025-03-01 10:00 UTC)));
        assert_eq!(merged.page_token.as_deref(), Some("cursor-token"));
    }
}

//! Processed-watermarks for derived-state consumers.
//!
//! The streak engine and the marketplace tracker each fold the committed
//! event stream into side state. A watermark is the `(created_at, event_id)`
//! pair of the last event a consumer has folded; replaying events at or
//! below the watermark is a guaranteed no-op. Timestamp-only tracking would
//! double-count events sharing an ingestion timestamp.

use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use time::OffsetDateTime;

/// Position of a consumer in the committed event stream.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Watermark {
    pub mark_at: OffsetDateTime,
    pub mark_event: String,
}

impl Watermark {
    /// Total order matching the store's `(created_at, event_id)` ordering.
    pub fn covers(&self, created_at: OffsetDateTime, event_id: &str) -> bool {
        (self.mark_at, self.mark_event.as_str()) >= (created_at, event_id)
    }
}

#[derive(Debug, Clone)]
pub struct GetWatermark {
    pub consumer: String,
}

impl Processor<GetWatermark> for DatabaseProcessor {
    type Output = Option<Watermark>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetWatermark")]
    async fn process(&self, query: GetWatermark) -> Result<Option<Watermark>, sqlx::Error> {
        sqlx::query_as::<_, Watermark>(
            r#"
            SELECT mark_at, mark_event
            FROM consumer_watermarks
            WHERE consumer = $1
            "#,
        )
        .bind(&query.consumer)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Advance a consumer watermark; never moves backward.
pub struct AdvanceWatermark {
    pub consumer: String,
    pub mark: Watermark,
}

impl Processor<AdvanceWatermark> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:AdvanceWatermark")]
    async fn process(&self, cmd: AdvanceWatermark) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO consumer_watermarks (consumer, mark_at, mark_event)
            VALUES ($1, $2, $3)
            ON CONFLICT (consumer) DO UPDATE SET
                mark_at = EXCLUDED.mark_at,
                mark_event = EXCLUDED.mark_event
            WHERE (EXCLUDED.mark_at, EXCLUDED.mark_event)
                > (consumer_watermarks.mark_at, consumer_watermarks.mark_event)
            "#,
        )
        .bind(&cmd.consumer)
        .bind(cmd.mark.mark_at)
        .bind(&cmd.mark.mark_event)
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
    fn covers_orders_by_timestamp_then_event_id() {
        let mark = Watermark {
            mark_at: datetime!(2025-03-01 10:00 UTC),
            mark_event: "500".to_string(),
        };
        assert!(mark.covers(datetime!(2025-03-01 09:59 UTC), "999"));
        assert!(mark.covers(datetime!(2025-03-01 10:00 UTC), "500"));
        assert!(mark.covers(datetime!(2025-03-01 10:00 UTC), "499"));
        assert!(!mark.covers(datetime!(2025-03-01 10:00 UTC), "501"));
        assert!(!mark.covers(datetime!(2025-03-01 10:01 UTC), "001"));
    }
}

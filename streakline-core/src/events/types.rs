//! Event type definitions for the processor pipeline.

use crate::feeds::SourceId;

/// Emitted by the scheduler to trigger one poll cycle for a source.
#[derive(Debug, Clone)]
pub struct PollTick {
    pub source: SourceId,
}

/// Emitted by the feed poller after a cycle has durably persisted its batch
/// and advanced the cursor.
///
/// `inserted` is the number of rows that were actually new (0 when the
/// cycle only re-fetched known events).
#[derive(Debug, Clone)]
pub struct IngestTick {
    pub source: SourceId,
    pub inserted: u64,
}

/// Emitted by the feed poller when a cycle failed, so the scheduler can
/// stretch this source's interval.
///
/// `consecutive_failures = 0` resets the source back to its base interval.
#[derive(Debug, Clone)]
pub struct PollDelayHint {
    pub source: SourceId,
    pub consecutive_failures: u32,
}

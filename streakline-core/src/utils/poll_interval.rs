use std::time::Duration;

/// Upper bound for the failure backoff, 30 minutes.
const MAX_BACKOFF: Duration = Duration::from_secs(30 * 60);

/// Returns the delay before the next poll cycle for a source.
///
/// A healthy source polls at its configured base interval. After consecutive
/// failed cycles the interval doubles per failure (capped at 30 minutes) so
/// a flapping upstream API is not hammered.
pub fn next_poll_delay(base: Duration, consecutive_failures: u32) -> Duration {
    if consecutive_failures == 0 {
        return base;
    }
    let factor = 1u32 << consecutive_failures.min(5);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_source_uses_base_interval() {
        assert_eq!(
            next_poll_delay(Duration::from_secs(60), 0),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn backoff_doubles_per_failure() {
        let base = Duration::from_secs(60);
        assert_eq!(next_poll_delay(base, 1), Duration::from_secs(120));
        assert_eq!(next_poll_delay(base, 2), Duration::from_secs(240));
        assert_eq!(next_poll_delay(base, 3), Duration::from_secs(480));
    }

    #[test]
    fn backoff_is_capped() {
        let base = Duration::from_secs(600);
        assert_eq!(next_poll_delay(base, 10), Duration::from_secs(1800));
        assert_eq!(next_poll_delay(base, 100), Duration::from_secs(1800));
    }
}

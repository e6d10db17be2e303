//! Calendar period indices for streak and achievement bookkeeping.
//!
//! Every streak kind maps a date onto a monotonically increasing integer
//! index such that consecutive periods differ by exactly 1. Streak updates
//! compare indices instead of raw timestamps, which is what makes
//! out-of-order replay safe.

use crate::entities::StreakKind;
use time::Date;

/// Julian day of 2001-01-01, a Monday. Aligns week indices on Monday.
const MONDAY_ANCHOR: i64 = 2_451_911;

/// Index of the calendar day: the Julian day number.
pub fn day_index(date: Date) -> i64 {
    i64::from(date.to_julian_day())
}

/// Index of the Monday-aligned calendar week.
pub fn week_index(date: Date) -> i64 {
    (i64::from(date.to_julian_day()) - MONDAY_ANCHOR).div_euclid(7)
}

/// Index of the calendar month: `year * 12 + month`.
pub fn month_index(date: Date) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month() as u8) - 1
}

/// Index of the calendar year.
pub fn year_index(date: Date) -> i64 {
    i64::from(date.year())
}

/// Period index of `date` for the given streak kind.
pub fn period_index(kind: StreakKind, date: Date) -> i64 {
    match kind {
        StreakKind::Daily => day_index(date),
        StreakKind::Weekly => week_index(date),
        StreakKind::Monthly => month_index(date),
        StreakKind::Yearly => year_index(date),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn consecutive_days_differ_by_one() {
        assert_eq!(
            day_index(date!(2025 - 03 - 01)) + 1,
            day_index(date!(2025 - 03 - 02))
        );
        // Month rollover.
        assert_eq!(
            day_index(date!(2025 - 02 - 28)) + 1,
            day_index(date!(2025 - 03 - 01))
        );
    }

    #[test]
    fn week_index_is_monday_aligned() {
        // 2025-01-05 is a Sunday, 2025-01-06 a Monday.
        let sunday = week_index(date!(2025 - 01 - 05));
        let monday = week_index(date!(2025 - 01 - 06));
        assert_eq!(sunday + 1, monday);
        // The rest of that week stays in the same bucket.
        assert_eq!(monday, week_index(date!(2025 - 01 - 12)));
        assert_eq!(monday + 1, week_index(date!(2025 - 01 - 13)));
    }

    #[test]
    fn month_index_crosses_year_boundary() {
        assert_eq!(
            month_index(date!(2024 - 12 - 15)) + 1,
            month_index(date!(2025 - 01 - 01))
        );
    }

    #[test]
    fn year_index_is_the_year() {
        assert_eq!(year_index(date!(2025 - 06 - 30)), 2025);
    }
}

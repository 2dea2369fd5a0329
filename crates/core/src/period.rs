use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive calendar range used for ledger search windows and statement periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            DateRange { start, end }
        } else {
            DateRange { start: end, end: start }
        }
    }

    /// Symmetric window of `days` on either side of `date`.
    pub fn around(date: NaiveDate, days: u32) -> Self {
        let pad = Duration::days(i64::from(days));
        DateRange {
            start: date - pad,
            end: date + pad,
        }
    }

    /// Smallest range covering every date, widened by `pad_days` on both ends.
    /// Returns `None` for an empty iterator.
    pub fn spanning<I>(dates: I, pad_days: u32) -> Option<Self>
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        let mut iter = dates.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d)));
        let pad = Duration::days(i64::from(pad_days));
        Some(DateRange {
            start: min - pad,
            end: max + pad,
        })
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn days(self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn date_range_contains_is_inclusive() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 12, 31));
        assert!(range.contains(date(2024, 6, 15)));
        assert!(range.contains(date(2024, 1, 1)));
        assert!(range.contains(date(2024, 12, 31)));
        assert!(!range.contains(date(2023, 12, 31)));
        assert!(!range.contains(date(2025, 1, 1)));
    }

    #[test]
    fn new_orders_reversed_bounds() {
        let range = DateRange::new(date(2024, 3, 10), date(2024, 3, 1));
        assert_eq!(range.start, date(2024, 3, 1));
        assert_eq!(range.end, date(2024, 3, 10));
    }

    #[test]
    fn around_is_symmetric() {
        let range = DateRange::around(date(2025, 5, 2), 3);
        assert_eq!(range.start, date(2025, 4, 29));
        assert_eq!(range.end, date(2025, 5, 5));
        assert_eq!(range.days(), 7);
    }

    #[test]
    fn spanning_pads_min_and_max() {
        let range = DateRange::spanning(
            vec![date(2025, 5, 10), date(2025, 5, 2), date(2025, 5, 20)],
            3,
        )
        .unwrap();
        assert_eq!(range.start, date(2025, 4, 29));
        assert_eq!(range.end, date(2025, 5, 23));
    }

    #[test]
    fn spanning_empty_is_none() {
        assert!(DateRange::spanning(Vec::new(), 3).is_none());
    }

    #[test]
    fn date_range_display() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 12, 31));
        assert_eq!(range.to_string(), "2024-01-01 to 2024-12-31");
    }
}

//! Splits a query window into the span served by daily rollups and the
//! edge fragments that must be read from the raw event table.

use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::db::TimeRange;

/// Floor `t` to UTC midnight.
pub fn day_start(t: DateTime<Utc>) -> DateTime<Utc> {
    t.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// First UTC midnight at or after `t`.
pub fn day_ceil(t: DateTime<Utc>) -> DateTime<Utc> {
    let floor = day_start(t);
    if floor == t {
        floor
    } else {
        floor + Duration::days(1)
    }
}

/// The smallest whole-day range that contains `range`.
pub fn covering_days(range: TimeRange) -> TimeRange {
    TimeRange::new(day_start(range.start), day_ceil(range.end))
}

/// Result of partitioning `[start, end)`.
///
/// `head`, `full` and `tail` are pairwise disjoint and together cover the
/// input window exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPartition {
    /// Whole UTC days, eligible for rollups
    pub full: Option<TimeRange>,
    /// Fragment before the first whole day
    pub head: Option<TimeRange>,
    /// Fragment from the start of the day containing `end` up to `end`
    pub tail: Option<TimeRange>,
}

impl WindowPartition {
    /// Ranges that must be aggregated from raw events, in time order.
    pub fn partial_ranges(&self) -> Vec<TimeRange> {
        self.head.into_iter().chain(self.tail).collect()
    }

    pub fn has_full_range(&self) -> bool {
        self.full.is_some()
    }
}

/// Partition `window` into rollup-eligible whole days and raw edge ranges.
///
/// An empty or inverted window yields no ranges at all.
pub fn partition(window: TimeRange) -> WindowPartition {
    let TimeRange { start, end } = window;
    if start >= end {
        return WindowPartition {
            full: None,
            head: None,
            tail: None,
        };
    }

    let full_start = day_ceil(start);
    let full_end = day_start(end);

    if full_start >= full_end {
        return WindowPartition {
            full: None,
            head: Some(window),
            tail: None,
        };
    }

    let head = TimeRange::new(start, full_start);
    let tail = TimeRange::new(start.max(full_end), end);

    WindowPartition {
        full: Some(TimeRange::new(full_start, full_end)),
        head: (!head.is_empty()).then_some(head),
        tail: (!tail.is_empty()).then_some(tail),
    }
}

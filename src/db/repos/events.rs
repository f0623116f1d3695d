use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::TimeRange;
use crate::{
    db::error::DbResult,
    models::{CostRow, CostUpdate, GroupAggregate, Grouping, UsageEvent, WindowStats},
};

#[async_trait]
pub trait EventRepo: Send + Sync {
    /// Bulk-load events. Duplicate natural keys are silently skipped.
    ///
    /// Ingestion proper lives outside this service; this exists for loaders,
    /// backfills and tests. Returns the number of rows inserted.
    async fn insert_batch(&self, events: &[UsageEvent]) -> DbResult<usize>;

    /// Aggregate raw events over the union of `ranges`, grouped by `grouping`.
    ///
    /// The ranges must be pairwise disjoint. Groups with no rows are omitted.
    async fn aggregate(
        &self,
        tenant_id: &str,
        grouping: &Grouping,
        ranges: &[TimeRange],
    ) -> DbResult<Vec<GroupAggregate>>;

    /// Fetch one page of events with `start <= timestamp <= end`, ordered by
    /// `(timestamp, trace_id, call_sequence)`.
    async fn fetch_cost_rows(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: u64,
        limit: u32,
    ) -> DbResult<Vec<CostRow>>;

    /// Apply all updates as one multi-row statement keyed by the natural key.
    /// Returns the number of rows changed.
    async fn update_costs(&self, tenant_id: &str, updates: &[CostUpdate]) -> DbResult<u64>;

    /// Totals, distinct counts and latency percentiles for one window.
    async fn window_stats(&self, tenant_id: &str, range: TimeRange) -> DbResult<WindowStats>;
}

/// Nearest-rank position (0-based) of percentile `p` among `n` sorted values.
///
/// Matches PostgreSQL's `percentile_disc`.
pub fn nearest_rank_offset(p: f64, n: i64) -> i64 {
    if n <= 0 {
        return 0;
    }
    let rank = (p * n as f64).ceil() as i64;
    (rank - 1).clamp(0, n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_rank_offset() {
        assert_eq!(nearest_rank_offset(0.5, 10), 4);
        assert_eq!(nearest_rank_offset(0.95, 10), 9);
        assert_eq!(nearest_rank_offset(0.99, 100), 98);
        assert_eq!(nearest_rank_offset(0.5, 1), 0);
        assert_eq!(nearest_rank_offset(0.5, 0), 0);
    }
}

use async_trait::async_trait;

use super::TimeRange;
use crate::{
    db::error::DbResult,
    models::{GroupAggregate, RollupVariant},
};

#[async_trait]
pub trait RollupRepo: Send + Sync {
    /// Read rollup rows with `bucket` in `range`, one row per bucket and group.
    ///
    /// `range` must be aligned to UTC day boundaries. Fails if the variant's
    /// table is missing or unreadable; callers treat that as "rollup
    /// unavailable".
    async fn fetch(
        &self,
        tenant_id: &str,
        variant: RollupVariant,
        range: TimeRange,
    ) -> DbResult<Vec<GroupAggregate>>;

    /// Rematerialize every day bucket that overlaps `range` from the event
    /// table, replacing what was there. Returns the number of rows written.
    async fn refresh(
        &self,
        tenant_id: &str,
        variant: RollupVariant,
        range: TimeRange,
    ) -> DbResult<u64>;
}

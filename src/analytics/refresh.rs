use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::{
    AnalyticsError, AnalyticsService,
    window::{covering_days, day_start},
};
use crate::{
    db::{RollupRepo, TimeRange},
    models::RollupVariant,
    observability::metrics,
};

/// Result of rematerializing one rollup table over a day range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshOutcome {
    pub target: RollupVariant,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Rollup rows written
    pub rows: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RefreshOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Whole UTC days touching any instant in the inclusive range `[first, last]`.
pub fn touched_days(first: DateTime<Utc>, last: DateTime<Utc>) -> TimeRange {
    TimeRange::new(day_start(first), day_start(last) + Duration::days(1))
}

/// Refresh every rollup variant over `days`.
///
/// Each variant is refreshed independently: one failing table is reported in
/// its outcome and does not stop the others.
pub async fn refresh_variants(
    rollups: &dyn RollupRepo,
    tenant_id: &str,
    days: TimeRange,
) -> Vec<RefreshOutcome> {
    let mut outcomes = Vec::with_capacity(RollupVariant::ALL.len());

    for variant in RollupVariant::ALL {
        let table = variant.table_name();
        let (rows, error) = match rollups.refresh(tenant_id, variant, days).await {
            Ok(rows) => {
                info!(tenant_id, table, range = %days, rows, "Rollup refreshed");
                metrics::record_rollup_refresh(table, true);
                (rows, None)
            }
            Err(e) => {
                warn!(tenant_id, table, range = %days, error = %e, "Rollup refresh failed");
                metrics::record_rollup_refresh(table, false);
                (0, Some(e.to_string()))
            }
        };
        outcomes.push(RefreshOutcome {
            target: variant,
            start: days.start,
            end: days.end,
            rows,
            error,
        });
    }

    outcomes
}

impl AnalyticsService {
    /// Rematerialize all rollups for the UTC days overlapping `[start, end)`.
    #[instrument(skip(self), err)]
    pub async fn refresh_rollups(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RefreshOutcome>, AnalyticsError> {
        if start >= end {
            return Err(AnalyticsError::validation("start must be before end"));
        }
        let days = covering_days(TimeRange::new(start, end));
        Ok(refresh_variants(self.rollups.as_ref(), tenant_id, days).await)
    }
}

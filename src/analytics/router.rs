use std::{collections::BTreeMap, time::Instant};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::{AnalyticsError, AnalyticsService, merge::GroupAccumulator, window::partition};
use crate::{
    db::TimeRange,
    models::{DataSource, GroupAggregate, GroupField, Grouping, RollupVariant},
    observability::metrics,
};

/// A grouped usage query over `[start, end)`.
#[derive(Debug, Clone)]
pub struct UsageQuery {
    pub grouping: Grouping,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

/// One result group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsRow {
    /// Grouped column values keyed by column name
    #[serde(flatten)]
    pub group: BTreeMap<String, Option<String>>,
    pub request_count: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub avg_latency_ms: f64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl AnalyticsRow {
    fn new(grouping: &Grouping, aggregate: GroupAggregate) -> Self {
        let group = grouping
            .fields()
            .zip(aggregate.key.0)
            .map(|(field, value)| (field.as_str().to_string(), value))
            .collect();
        Self {
            group,
            request_count: aggregate.request_count,
            input_tokens: aggregate.input_tokens,
            output_tokens: aggregate.output_tokens,
            total_tokens: aggregate.total_tokens,
            total_cost: aggregate.total_cost,
            avg_latency_ms: aggregate.avg_latency_ms,
            first_seen: aggregate.first_seen,
            last_seen: aggregate.last_seen,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageQueryResponse {
    pub source: DataSource,
    pub group_by: Vec<GroupField>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub rows: Vec<AnalyticsRow>,
    /// Groups before pagination
    pub total_groups: usize,
    pub limit: u32,
    pub offset: u64,
}

impl AnalyticsService {
    /// Run a grouped query, preferring rollups for whole days.
    ///
    /// A rollup read failure is not an error: the whole window is re-read
    /// from raw events and the response is tagged `base_table`.
    #[instrument(
        skip(self, query),
        fields(grouping = %query.grouping, start = %query.start, end = %query.end),
        err
    )]
    pub async fn query(
        &self,
        tenant_id: &str,
        query: &UsageQuery,
    ) -> Result<UsageQueryResponse, AnalyticsError> {
        let (limit, offset) = self.validate(query)?;
        let started = Instant::now();

        let window = TimeRange::new(query.start, query.end);
        let (source, groups) = self.aggregate_window(tenant_id, &query.grouping, window).await?;

        let total_groups = groups.len();
        let rows = groups
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .map(|g| AnalyticsRow::new(&query.grouping, g))
            .collect::<Vec<_>>();

        metrics::record_analytics_query(source.as_str(), started.elapsed().as_secs_f64());
        debug!(source = source.as_str(), total_groups, returned = rows.len(), "Analytics query served");

        Ok(UsageQueryResponse {
            source,
            group_by: query.grouping.fields().collect(),
            start: query.start,
            end: query.end,
            rows,
            total_groups,
            limit,
            offset,
        })
    }

    fn validate(&self, query: &UsageQuery) -> Result<(u32, u64), AnalyticsError> {
        if query.start >= query.end {
            return Err(AnalyticsError::validation("start must be before end"));
        }
        if query.end - query.start > Duration::days(self.config.max_window_days) {
            return Err(AnalyticsError::validation(format!(
                "window must not exceed {} days",
                self.config.max_window_days
            )));
        }

        let limit = query.limit.unwrap_or(self.config.default_limit);
        if limit == 0 || limit > self.config.max_limit {
            return Err(AnalyticsError::validation(format!(
                "limit must be between 1 and {}",
                self.config.max_limit
            )));
        }

        let offset = query.offset.unwrap_or(0);
        if offset > self.config.max_offset {
            return Err(AnalyticsError::validation(format!(
                "offset must not exceed {}",
                self.config.max_offset
            )));
        }

        Ok((limit, offset))
    }

    /// Aggregate `window` into final sorted rows and report which store served it.
    async fn aggregate_window(
        &self,
        tenant_id: &str,
        grouping: &Grouping,
        window: TimeRange,
    ) -> Result<(DataSource, Vec<GroupAggregate>), AnalyticsError> {
        let parts = partition(window);

        let (variant, full) = match (RollupVariant::for_grouping(grouping), parts.full) {
            (Some(variant), Some(full)) => (variant, full),
            _ => return self.aggregate_raw(tenant_id, grouping, window).await,
        };

        let partials = parts.partial_ranges();
        let raw = async {
            if partials.is_empty() {
                Ok(Vec::new())
            } else {
                self.events.aggregate(tenant_id, grouping, &partials).await
            }
        };
        let (rollup, raw) = futures::join!(self.rollups.fetch(tenant_id, variant, full), raw);

        match rollup {
            Ok(rollup_rows) => {
                let raw_rows = raw?;
                let mut acc = GroupAccumulator::new();
                acc.extend(&rollup_rows);
                acc.extend(&raw_rows);
                Ok((DataSource::ContinuousAggregate, acc.finish()))
            }
            Err(e) => {
                warn!(
                    tenant_id,
                    table = variant.table_name(),
                    error = %e,
                    "Rollup unavailable, falling back to raw events"
                );
                metrics::record_rollup_fallback(variant.table_name());
                self.aggregate_raw(tenant_id, grouping, window).await
            }
        }
    }

    async fn aggregate_raw(
        &self,
        tenant_id: &str,
        grouping: &Grouping,
        window: TimeRange,
    ) -> Result<(DataSource, Vec<GroupAggregate>), AnalyticsError> {
        let rows = self.events.aggregate(tenant_id, grouping, &[window]).await?;
        let mut acc = GroupAccumulator::new();
        acc.extend(&rows);
        Ok((DataSource::BaseTable, acc.finish()))
    }
}

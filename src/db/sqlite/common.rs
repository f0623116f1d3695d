use sqlx::{Row, sqlite::SqliteRow};

use crate::{
    db::TimeRange,
    models::{GroupAggregate, GroupKey, Grouping},
};

/// `(timestamp >= ? AND timestamp < ?) OR ...`, one pair of binds per range.
pub fn ranges_predicate(ranges: &[TimeRange]) -> String {
    ranges
        .iter()
        .map(|_| "(timestamp >= ? AND timestamp < ?)")
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Decode a row produced by an aggregate query that selected the grouping
/// columns plus the standard measure aliases.
pub fn group_aggregate(row: &SqliteRow, grouping: &Grouping) -> GroupAggregate {
    GroupAggregate {
        key: GroupKey(
            grouping
                .fields()
                .map(|field| row.get::<Option<String>, _>(field.column()))
                .collect(),
        ),
        request_count: row.get("requests"),
        input_tokens: row.get("input_tokens"),
        output_tokens: row.get("output_tokens"),
        total_tokens: row.get("total_tokens"),
        total_cost: row.get("cost_total"),
        avg_latency_ms: row.get("avg_latency_ms"),
        first_seen: row.get("first_seen"),
        last_seen: row.get("last_seen"),
    }
}

/// Measures over `llm_events`, aliased to the rollup column names.
///
/// Casts keep SUM/AVG results REAL even when every input is NULL.
pub const EVENT_MEASURES: &str = "\
    COUNT(*) AS requests, \
    COALESCE(SUM(usage_input_tokens), 0) AS input_tokens, \
    COALESCE(SUM(usage_output_tokens), 0) AS output_tokens, \
    COALESCE(SUM(COALESCE(usage_total_tokens, usage_input_tokens + usage_output_tokens)), 0) AS total_tokens, \
    CAST(COALESCE(SUM(cost_total), 0) AS REAL) AS cost_total, \
    CAST(COALESCE(AVG(latency_ms), 0) AS REAL) AS avg_latency_ms, \
    MIN(timestamp) AS first_seen, \
    MAX(timestamp) AS last_seen";

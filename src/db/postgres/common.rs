use sqlx::{Row, postgres::PgRow};

use crate::{
    db::TimeRange,
    models::{GroupAggregate, GroupKey, Grouping},
};

/// `(timestamp >= $n AND timestamp < $n+1) OR ...` with placeholders
/// numbered from `first`.
pub fn ranges_predicate(ranges: &[TimeRange], first: usize) -> String {
    ranges
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let p = first + i * 2;
            format!("(timestamp >= ${} AND timestamp < ${})", p, p + 1)
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

pub fn group_aggregate(row: &PgRow, grouping: &Grouping) -> GroupAggregate {
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
/// `SUM(bigint)` and `AVG` return NUMERIC in PostgreSQL, hence the casts.
pub const EVENT_MEASURES: &str = "\
    COUNT(*) AS requests, \
    COALESCE(SUM(usage_input_tokens), 0)::BIGINT AS input_tokens, \
    COALESCE(SUM(usage_output_tokens), 0)::BIGINT AS output_tokens, \
    COALESCE(SUM(COALESCE(usage_total_tokens, usage_input_tokens + usage_output_tokens)), 0)::BIGINT AS total_tokens, \
    COALESCE(SUM(cost_total), 0)::FLOAT8 AS cost_total, \
    COALESCE(AVG(latency_ms), 0)::FLOAT8 AS avg_latency_ms, \
    MIN(timestamp) AS first_seen, \
    MAX(timestamp) AS last_seen";

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn test_ranges_predicate_numbering() {
        let t = |h| Utc.with_ymd_and_hms(2025, 1, 1, h, 0, 0).unwrap();
        let ranges = [TimeRange::new(t(0), t(1)), TimeRange::new(t(5), t(6))];
        assert_eq!(
            ranges_predicate(&ranges, 2),
            "(timestamp >= $2 AND timestamp < $3) OR (timestamp >= $4 AND timestamp < $5)"
        );
    }
}

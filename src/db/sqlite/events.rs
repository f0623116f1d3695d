use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::common::{EVENT_MEASURES, group_aggregate, ranges_predicate};
use crate::{
    db::{
        error::DbResult,
        repos::{EventRepo, TimeRange, nearest_rank_offset},
        sql::{group_by_clause, select_columns},
    },
    models::{CostRow, CostUpdate, EventKey, GroupAggregate, Grouping, UsageEvent, WindowStats},
};

/// SQLite's default host parameter limit is 999.
/// Each event uses 17 parameters.
const MAX_EVENTS_PER_INSERT: usize = 50;

/// Each cost update uses 4 parameters, plus one for the tenant.
const MAX_UPDATES_PER_STATEMENT: usize = 200;

pub struct SqliteEventRepo {
    pool: SqlitePool,
}

impl SqliteEventRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn latency_at(&self, tenant_id: &str, range: TimeRange, offset: i64) -> DbResult<f64> {
        let latency: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT latency_ms FROM llm_events
            WHERE tenant_id = ? AND timestamp >= ? AND timestamp < ?
            ORDER BY latency_ms
            LIMIT 1 OFFSET ?
            "#,
        )
        .bind(tenant_id)
        .bind(range.start)
        .bind(range.end)
        .bind(offset)
        .fetch_optional(&self.pool)
        .await?;

        Ok(latency.unwrap_or(0) as f64)
    }
}

#[async_trait]
impl EventRepo for SqliteEventRepo {
    async fn insert_batch(&self, events: &[UsageEvent]) -> DbResult<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in events.chunks(MAX_EVENTS_PER_INSERT) {
            let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"; chunk.len()];
            let query = format!(
                r#"
                INSERT OR IGNORE INTO llm_events (
                    tenant_id, timestamp, trace_id, call_sequence, model, provider,
                    agent, user_id, usage_input_tokens, usage_output_tokens,
                    usage_cached_tokens, usage_total_tokens, cost_total, latency_ms,
                    finish_reason, tool_call_count, stream
                )
                VALUES {}
                "#,
                placeholders.join(", ")
            );

            let mut query_builder = sqlx::query(&query);
            for event in chunk {
                query_builder = query_builder
                    .bind(&event.tenant_id)
                    .bind(event.timestamp)
                    .bind(&event.trace_id)
                    .bind(event.call_sequence)
                    .bind(&event.model)
                    .bind(&event.provider)
                    .bind(&event.agent)
                    .bind(&event.user_id)
                    .bind(event.usage_input_tokens)
                    .bind(event.usage_output_tokens)
                    .bind(event.usage_cached_tokens)
                    .bind(event.usage_total_tokens)
                    .bind(event.cost_total)
                    .bind(event.latency_ms)
                    .bind(&event.finish_reason)
                    .bind(event.tool_call_count)
                    .bind(event.stream);
            }

            let result = query_builder.execute(&mut *tx).await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn aggregate(
        &self,
        tenant_id: &str,
        grouping: &Grouping,
        ranges: &[TimeRange],
    ) -> DbResult<Vec<GroupAggregate>> {
        let ranges: Vec<TimeRange> = ranges.iter().copied().filter(|r| !r.is_empty()).collect();
        if ranges.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            r#"
            SELECT {columns}{EVENT_MEASURES}
            FROM llm_events
            WHERE tenant_id = ? AND ({predicate})
            {group_by}
            "#,
            columns = select_columns(grouping),
            predicate = ranges_predicate(&ranges),
            group_by = group_by_clause(grouping),
        );

        let mut query_builder = sqlx::query(&query).bind(tenant_id);
        for range in &ranges {
            query_builder = query_builder.bind(range.start).bind(range.end);
        }
        let rows = query_builder.fetch_all(&self.pool).await?;

        // Without GROUP BY an empty match still yields one all-zero row.
        Ok(rows
            .iter()
            .map(|row| group_aggregate(row, grouping))
            .filter(|agg| agg.request_count > 0)
            .collect())
    }

    async fn fetch_cost_rows(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: u64,
        limit: u32,
    ) -> DbResult<Vec<CostRow>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, trace_id, call_sequence, model, provider,
                   usage_input_tokens, usage_output_tokens, usage_cached_tokens, cost_total
            FROM llm_events
            WHERE tenant_id = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp, trace_id, call_sequence
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(tenant_id)
        .bind(start)
        .bind(end)
        .bind(i64::from(limit))
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| CostRow {
                key: EventKey {
                    timestamp: row.get("timestamp"),
                    trace_id: row.get("trace_id"),
                    call_sequence: row.get("call_sequence"),
                },
                model: row.get("model"),
                provider: row.get("provider"),
                usage_input_tokens: row.get("usage_input_tokens"),
                usage_output_tokens: row.get("usage_output_tokens"),
                usage_cached_tokens: row.get("usage_cached_tokens"),
                cost_total: row.get("cost_total"),
            })
            .collect())
    }

    async fn update_costs(&self, tenant_id: &str, updates: &[CostUpdate]) -> DbResult<u64> {
        if updates.is_empty() {
            return Ok(0);
        }

        let mut changed = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in updates.chunks(MAX_UPDATES_PER_STATEMENT) {
            let values = vec!["(?, ?, ?, ?)"; chunk.len()];
            let query = format!(
                r#"
                WITH updates(ts, trace_id, call_sequence, cost_total) AS (VALUES {})
                UPDATE llm_events
                SET cost_total = updates.cost_total
                FROM updates
                WHERE llm_events.tenant_id = ?
                    AND llm_events.timestamp = updates.ts
                    AND llm_events.trace_id = updates.trace_id
                    AND llm_events.call_sequence = updates.call_sequence
                "#,
                values.join(", ")
            );

            let mut query_builder = sqlx::query(&query);
            for update in chunk {
                query_builder = query_builder
                    .bind(update.key.timestamp)
                    .bind(&update.key.trace_id)
                    .bind(update.key.call_sequence)
                    .bind(update.cost_total);
            }
            let result = query_builder.bind(tenant_id).execute(&mut *tx).await?;
            changed += result.rows_affected();
        }

        tx.commit().await?;
        Ok(changed)
    }

    async fn window_stats(&self, tenant_id: &str, range: TimeRange) -> DbResult<WindowStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS requests,
                CAST(COALESCE(SUM(cost_total), 0) AS REAL) AS cost_total,
                COALESCE(SUM(usage_input_tokens), 0) AS input_tokens,
                COALESCE(SUM(usage_output_tokens), 0) AS output_tokens,
                COALESCE(SUM(usage_cached_tokens), 0) AS cached_tokens,
                COALESCE(SUM(COALESCE(usage_total_tokens, usage_input_tokens + usage_output_tokens)), 0) AS total_tokens,
                COUNT(DISTINCT trace_id) AS unique_traces,
                COUNT(DISTINCT user_id) AS unique_users,
                COALESCE(SUM(CASE WHEN stream THEN 1 ELSE 0 END), 0) AS streaming_requests,
                COALESCE(SUM(tool_call_count), 0) AS tool_calls,
                COALESCE(SUM(CASE WHEN finish_reason = 'error' THEN 1 ELSE 0 END), 0) AS errors,
                CAST(COALESCE(AVG(latency_ms), 0) AS REAL) AS avg_latency_ms
            FROM llm_events
            WHERE tenant_id = ? AND timestamp >= ? AND timestamp < ?
            "#,
        )
        .bind(tenant_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_one(&self.pool)
        .await?;

        let request_count: i64 = row.get("requests");
        let mut stats = WindowStats {
            request_count,
            total_cost: row.get("cost_total"),
            input_tokens: row.get("input_tokens"),
            output_tokens: row.get("output_tokens"),
            cached_tokens: row.get("cached_tokens"),
            total_tokens: row.get("total_tokens"),
            unique_traces: row.get("unique_traces"),
            unique_users: row.get("unique_users"),
            streaming_count: row.get("streaming_requests"),
            tool_call_count: row.get("tool_calls"),
            error_count: row.get("errors"),
            avg_latency_ms: row.get("avg_latency_ms"),
            ..WindowStats::default()
        };

        if request_count > 0 {
            // SQLite has no percentile aggregate; pick the nearest-rank row.
            stats.p50_latency_ms = self
                .latency_at(tenant_id, range, nearest_rank_offset(0.5, request_count))
                .await?;
            stats.p95_latency_ms = self
                .latency_at(tenant_id, range, nearest_rank_offset(0.95, request_count))
                .await?;
            stats.p99_latency_ms = self
                .latency_at(tenant_id, range, nearest_rank_offset(0.99, request_count))
                .await?;
        }

        Ok(stats)
    }
}

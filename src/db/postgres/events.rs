use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::common::{EVENT_MEASURES, group_aggregate, ranges_predicate};
use crate::{
    db::{
        error::DbResult,
        repos::{EventRepo, TimeRange},
        sql::{group_by_clause, select_columns},
    },
    models::{CostRow, CostUpdate, EventKey, GroupAggregate, Grouping, UsageEvent, WindowStats},
};

/// PostgreSQL allows 65535 parameters per statement; each event uses 17.
const MAX_EVENTS_PER_INSERT: usize = 1000;
const EVENT_PARAMS: usize = 17;

pub struct PostgresEventRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresEventRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }
}

#[async_trait]
impl EventRepo for PostgresEventRepo {
    async fn insert_batch(&self, events: &[UsageEvent]) -> DbResult<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0;
        let mut tx = self.write_pool.begin().await?;

        for chunk in events.chunks(MAX_EVENTS_PER_INSERT) {
            let placeholders: Vec<String> = (0..chunk.len())
                .map(|i| {
                    let params: Vec<String> = (1..=EVENT_PARAMS)
                        .map(|p| format!("${}", i * EVENT_PARAMS + p))
                        .collect();
                    format!("({})", params.join(", "))
                })
                .collect();

            let query = format!(
                r#"
                INSERT INTO llm_events (
                    tenant_id, timestamp, trace_id, call_sequence, model, provider,
                    agent, user_id, usage_input_tokens, usage_output_tokens,
                    usage_cached_tokens, usage_total_tokens, cost_total, latency_ms,
                    finish_reason, tool_call_count, stream
                )
                VALUES {}
                ON CONFLICT (tenant_id, timestamp, trace_id, call_sequence) DO NOTHING
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
            WHERE tenant_id = $1 AND ({predicate})
            {group_by}
            "#,
            columns = select_columns(grouping),
            predicate = ranges_predicate(&ranges, 2),
            group_by = group_by_clause(grouping),
        );

        let mut query_builder = sqlx::query(&query).bind(tenant_id);
        for range in &ranges {
            query_builder = query_builder.bind(range.start).bind(range.end);
        }
        let rows = query_builder.fetch_all(&self.read_pool).await?;

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
        // Paging reads the primary: rows just repriced must not reappear
        // with stale costs from a lagging replica.
        let rows = sqlx::query(
            r#"
            SELECT timestamp, trace_id, call_sequence, model, provider,
                   usage_input_tokens, usage_output_tokens, usage_cached_tokens, cost_total
            FROM llm_events
            WHERE tenant_id = $1 AND timestamp >= $2 AND timestamp <= $3
            ORDER BY timestamp, trace_id, call_sequence
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(tenant_id)
        .bind(start)
        .bind(end)
        .bind(i64::from(limit))
        .bind(offset as i64)
        .fetch_all(&self.write_pool)
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

        let timestamps: Vec<DateTime<Utc>> = updates.iter().map(|u| u.key.timestamp).collect();
        let trace_ids: Vec<String> = updates.iter().map(|u| u.key.trace_id.clone()).collect();
        let sequences: Vec<i32> = updates.iter().map(|u| u.key.call_sequence).collect();
        let costs: Vec<f64> = updates.iter().map(|u| u.cost_total).collect();

        let result = sqlx::query(
            r#"
            UPDATE llm_events AS e
            SET cost_total = u.cost_total
            FROM UNNEST($2::TIMESTAMPTZ[], $3::TEXT[], $4::INT4[], $5::FLOAT8[])
                AS u(ts, trace_id, call_sequence, cost_total)
            WHERE e.tenant_id = $1
                AND e.timestamp = u.ts
                AND e.trace_id = u.trace_id
                AND e.call_sequence = u.call_sequence
            "#,
        )
        .bind(tenant_id)
        .bind(&timestamps)
        .bind(&trace_ids)
        .bind(&sequences)
        .bind(&costs)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn window_stats(&self, tenant_id: &str, range: TimeRange) -> DbResult<WindowStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS requests,
                COALESCE(SUM(cost_total), 0)::FLOAT8 AS cost_total,
                COALESCE(SUM(usage_input_tokens), 0)::BIGINT AS input_tokens,
                COALESCE(SUM(usage_output_tokens), 0)::BIGINT AS output_tokens,
                COALESCE(SUM(usage_cached_tokens), 0)::BIGINT AS cached_tokens,
                COALESCE(SUM(COALESCE(usage_total_tokens, usage_input_tokens + usage_output_tokens)), 0)::BIGINT AS total_tokens,
                COUNT(DISTINCT trace_id) AS unique_traces,
                COUNT(DISTINCT user_id) AS unique_users,
                COUNT(*) FILTER (WHERE stream) AS streaming_requests,
                COALESCE(SUM(tool_call_count), 0)::BIGINT AS tool_calls,
                COUNT(*) FILTER (WHERE finish_reason = 'error') AS errors,
                COALESCE(AVG(latency_ms), 0)::FLOAT8 AS avg_latency_ms,
                COALESCE(percentile_disc(0.5) WITHIN GROUP (ORDER BY latency_ms), 0)::FLOAT8 AS p50_latency_ms,
                COALESCE(percentile_disc(0.95) WITHIN GROUP (ORDER BY latency_ms), 0)::FLOAT8 AS p95_latency_ms,
                COALESCE(percentile_disc(0.99) WITHIN GROUP (ORDER BY latency_ms), 0)::FLOAT8 AS p99_latency_ms
            FROM llm_events
            WHERE tenant_id = $1 AND timestamp >= $2 AND timestamp < $3
            "#,
        )
        .bind(tenant_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_one(&self.read_pool)
        .await?;

        Ok(WindowStats {
            request_count: row.get("requests"),
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
            p50_latency_ms: row.get("p50_latency_ms"),
            p95_latency_ms: row.get("p95_latency_ms"),
            p99_latency_ms: row.get("p99_latency_ms"),
        })
    }
}

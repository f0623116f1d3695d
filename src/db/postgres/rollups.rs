use async_trait::async_trait;
use sqlx::PgPool;

use super::common::{EVENT_MEASURES, group_aggregate};
use crate::{
    analytics::window::covering_days,
    db::{
        error::DbResult,
        repos::{RollupRepo, TimeRange},
        sql::select_columns,
    },
    models::{GroupAggregate, RollupVariant},
};

const ROLLUP_MEASURES: &str = "\
    requests, input_tokens, output_tokens, total_tokens, cost_total, \
    avg_latency_ms, first_seen, last_seen";

pub struct PostgresRollupRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresRollupRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }
}

#[async_trait]
impl RollupRepo for PostgresRollupRepo {
    async fn fetch(
        &self,
        tenant_id: &str,
        variant: RollupVariant,
        range: TimeRange,
    ) -> DbResult<Vec<GroupAggregate>> {
        let grouping = variant.grouping();
        let query = format!(
            r#"
            SELECT {columns}{ROLLUP_MEASURES}
            FROM {table}
            WHERE tenant_id = $1 AND bucket >= $2 AND bucket < $3
            "#,
            columns = select_columns(&grouping),
            table = variant.table_name(),
        );

        let rows = sqlx::query(&query)
            .bind(tenant_id)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(&self.read_pool)
            .await?;

        Ok(rows.iter().map(|row| group_aggregate(row, &grouping)).collect())
    }

    async fn refresh(
        &self,
        tenant_id: &str,
        variant: RollupVariant,
        range: TimeRange,
    ) -> DbResult<u64> {
        let days = covering_days(range);
        if days.is_empty() {
            return Ok(0);
        }

        let grouping = variant.grouping();
        let table = variant.table_name();
        let columns = select_columns(&grouping);
        let group_columns: String = grouping
            .fields()
            .map(|field| format!(", {}", field.column()))
            .collect();

        let mut tx = self.write_pool.begin().await?;

        sqlx::query(&format!(
            "DELETE FROM {table} WHERE tenant_id = $1 AND bucket >= $2 AND bucket < $3"
        ))
        .bind(tenant_id)
        .bind(days.start)
        .bind(days.end)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {table} (tenant_id, bucket, {columns}{ROLLUP_MEASURES})
            SELECT $1, date_trunc('day', timestamp, 'UTC'), {columns}{EVENT_MEASURES}
            FROM llm_events
            WHERE tenant_id = $1 AND timestamp >= $2 AND timestamp < $3
            GROUP BY date_trunc('day', timestamp, 'UTC'){group_columns}
            "#
        ))
        .bind(tenant_id)
        .bind(days.start)
        .bind(days.end)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

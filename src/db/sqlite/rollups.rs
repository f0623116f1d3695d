use async_trait::async_trait;
use chrono::Duration;
use sqlx::SqlitePool;

use super::common::{EVENT_MEASURES, group_aggregate};
use crate::{
    analytics::window::covering_days,
    db::{
        error::DbResult,
        repos::{RollupRepo, TimeRange},
        sql::{group_by_clause, select_columns},
    },
    models::{GroupAggregate, RollupVariant},
};

const ROLLUP_MEASURES: &str = "\
    requests, input_tokens, output_tokens, total_tokens, cost_total, \
    avg_latency_ms, first_seen, last_seen";

pub struct SqliteRollupRepo {
    pool: SqlitePool,
}

impl SqliteRollupRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RollupRepo for SqliteRollupRepo {
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
            WHERE tenant_id = ? AND bucket >= ? AND bucket < ?
            "#,
            columns = select_columns(&grouping),
            table = variant.table_name(),
        );

        let rows = sqlx::query(&query)
            .bind(tenant_id)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(&self.pool)
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
        let insert = format!(
            r#"
            INSERT INTO {table} (tenant_id, bucket, {columns}{ROLLUP_MEASURES})
            SELECT ?, ?, {columns}{EVENT_MEASURES}
            FROM llm_events
            WHERE tenant_id = ? AND timestamp >= ? AND timestamp < ?
            {group_by}
            "#,
            group_by = group_by_clause(&grouping),
        );

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "DELETE FROM {table} WHERE tenant_id = ? AND bucket >= ? AND bucket < ?"
        ))
        .bind(tenant_id)
        .bind(days.start)
        .bind(days.end)
        .execute(&mut *tx)
        .await?;

        // One statement per day so the bucket value is bound, not computed,
        // and compares equal to the bounds used by `fetch`.
        let mut written = 0;
        let mut day = days.start;
        while day < days.end {
            let next = day + Duration::days(1);
            let result = sqlx::query(&insert)
                .bind(tenant_id)
                .bind(day)
                .bind(tenant_id)
                .bind(day)
                .bind(next)
                .execute(&mut *tx)
                .await?;
            written += result.rows_affected();
            day = next;
        }

        tx.commit().await?;
        Ok(written)
    }
}

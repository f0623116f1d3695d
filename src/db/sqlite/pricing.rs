use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::{
    db::{error::DbResult, repos::PricingRepo},
    pricing::{ModelPricing, PricingEntry},
};

pub struct SqlitePricingRepo {
    pool: SqlitePool,
}

impl SqlitePricingRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PricingRepo for SqlitePricingRepo {
    async fn list(&self) -> DbResult<Vec<PricingEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT provider, model, input_per_1m, output_per_1m, cached_input_per_1m
            FROM model_pricing
            ORDER BY provider, model
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PricingEntry {
                provider: row.get("provider"),
                model: row.get("model"),
                pricing: ModelPricing {
                    input_per_1m: row.get("input_per_1m"),
                    output_per_1m: row.get("output_per_1m"),
                    cached_input_per_1m: row.get("cached_input_per_1m"),
                },
            })
            .collect())
    }
}

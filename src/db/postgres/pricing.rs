use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::{
    db::{error::DbResult, repos::PricingRepo},
    pricing::{ModelPricing, PricingEntry},
};

pub struct PostgresPricingRepo {
    read_pool: PgPool,
}

impl PostgresPricingRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        Self {
            read_pool: read_pool.unwrap_or(write_pool),
        }
    }
}

#[async_trait]
impl PricingRepo for PostgresPricingRepo {
    async fn list(&self) -> DbResult<Vec<PricingEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT provider, model, input_per_1m, output_per_1m, cached_input_per_1m
            FROM model_pricing
            ORDER BY provider, model
            "#,
        )
        .fetch_all(&self.read_pool)
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

use async_trait::async_trait;

use crate::{db::error::DbResult, pricing::PricingEntry};

/// Read side of the pricing catalog. Catalog edits happen elsewhere.
#[async_trait]
pub trait PricingRepo: Send + Sync {
    async fn list(&self) -> DbResult<Vec<PricingEntry>>;
}

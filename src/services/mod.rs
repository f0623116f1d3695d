//! Service bundle held by the HTTP state and the CLI.

use std::sync::Arc;

use crate::{
    analytics::AnalyticsService,
    config::AppConfig,
    db::DbPool,
    pricing::PricingCache,
    recalc::CostRecalculator,
};

#[derive(Clone)]
pub struct Services {
    pub analytics: AnalyticsService,
    pub recalculator: Arc<CostRecalculator>,
}

impl Services {
    pub fn new(db: &DbPool, pricing: Arc<PricingCache>, config: &AppConfig) -> Self {
        Self {
            analytics: AnalyticsService::from_db(db, config.query.clone()),
            recalculator: Arc::new(CostRecalculator::from_db(
                db,
                pricing,
                config.recalculation.clone(),
            )),
        }
    }
}

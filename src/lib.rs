//! Meterline: hybrid rollup/raw analytics and cost recalculation for LLM
//! usage events.

pub mod analytics;
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod pricing;
pub mod recalc;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::pricing::{DbPricingSource, PricingCache, PricingSourceKind};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::AppConfig>,
    pub db: Option<Arc<db::DbPool>>,
    /// Present whenever a database is configured.
    pub services: Option<services::Services>,
    pub pricing: Arc<PricingCache>,
}

impl AppState {
    pub async fn new(config: config::AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db = if config.database.is_none() {
            tracing::warn!("No database configured; analytics endpoints will return 503");
            None
        } else {
            let pool = db::DbPool::connect(&config.database).await?;
            if config.database.run_migrations() {
                pool.run_migrations().await?;
            }
            Some(Arc::new(pool))
        };

        let pricing = match (config.pricing.source, &db) {
            (PricingSourceKind::Config, _) => PricingCache::from_table(config.pricing.table()),
            (PricingSourceKind::Database, Some(db)) => {
                PricingCache::load(Arc::new(DbPricingSource::new(db.pricing()))).await?
            }
            (PricingSourceKind::Database, None) => {
                return Err("pricing.source = \"database\" requires a configured database".into());
            }
        };
        let pricing = Arc::new(pricing);
        tracing::info!(
            source = ?config.pricing.source,
            models = pricing.snapshot().len(),
            "Pricing loaded"
        );

        let services = db
            .as_deref()
            .map(|db| services::Services::new(db, pricing.clone(), &config));

        Ok(Self {
            config: Arc::new(config),
            db,
            services,
            pricing,
        })
    }
}

pub fn build_app(config: &config::AppConfig, state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/health/live", get(routes::health::liveness))
        .route("/health/ready", get(routes::health::readiness))
        .nest("/v1", routes::api_routes());

    if config.observability.metrics.enabled {
        app = app.route(
            &config.observability.metrics.path,
            get(routes::health::prometheus),
        );
    }

    app.layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .with_state(state)
}

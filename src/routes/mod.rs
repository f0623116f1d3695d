pub mod analytics;
mod error;
pub mod health;
mod tenant;

use axum::{
    Router,
    routing::{get, post},
};
pub use error::*;
pub use tenant::*;

use crate::AppState;

/// Tenant-scoped analytics API, mounted under `/v1`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/analytics/usage", get(analytics::usage))
        .route("/analytics/summary", get(analytics::summary))
        .route("/analytics/recalculate", post(analytics::recalculate))
        .route("/analytics/rollups/refresh", post(analytics::refresh_rollups))
        .route("/pricing/refresh", post(analytics::refresh_pricing))
}

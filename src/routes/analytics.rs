//! Analytics and maintenance endpoints, scoped by the tenant header.

use axum::{
    Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiError, Tenant};
use crate::{
    AppState,
    analytics::{PeriodSummary, RefreshOutcome, UsageQuery, UsageQueryResponse},
    models::Grouping,
    recalc::{RecalculationReport, RecalculationRequest},
    services::Services,
};

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

fn services(state: &AppState) -> Result<&Services, ApiError> {
    state.services.as_ref().ok_or(ApiError::DatabaseRequired)
}

#[derive(Debug, Deserialize)]
pub struct UsageParams {
    /// Comma-separated columns, e.g. `model,provider`. Empty for one total row.
    #[serde(default)]
    pub group_by: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

impl UsageParams {
    fn into_query(self) -> Result<UsageQuery, ApiError> {
        let grouping =
            Grouping::parse(self.group_by.as_deref().unwrap_or("")).map_err(ApiError::Validation)?;
        Ok(UsageQuery {
            grouping,
            start: self.start,
            end: self.end,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

/// `GET /v1/analytics/usage`
#[tracing::instrument(name = "analytics.usage", skip_all, fields(tenant = %tenant.as_str()))]
pub async fn usage(
    State(state): State<AppState>,
    tenant: Tenant,
    params: Result<Query<UsageParams>, QueryRejection>,
) -> Result<Json<UsageQueryResponse>, ApiError> {
    let Query(params) = params?;
    let query = params.into_query()?;
    let response = services(&state)?
        .analytics
        .query(tenant.as_str(), &query)
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    #[serde(default = "default_summary_days")]
    pub days: u32,
}

fn default_summary_days() -> u32 {
    7
}

/// `GET /v1/analytics/summary`
#[tracing::instrument(name = "analytics.summary", skip_all, fields(tenant = %tenant.as_str()))]
pub async fn summary(
    State(state): State<AppState>,
    tenant: Tenant,
    params: Result<Query<SummaryParams>, QueryRejection>,
) -> Result<Json<PeriodSummary>, ApiError> {
    let Query(params) = params?;
    let summary = services(&state)?
        .analytics
        .period_summary(tenant.as_str(), params.days)
        .await?;
    Ok(Json(summary))
}

/// `POST /v1/analytics/recalculate`
///
/// Always answers 200 once the run started: failures, partial runs and batch
/// errors are reported in the body.
#[tracing::instrument(name = "analytics.recalculate", skip_all, fields(tenant = %tenant.as_str()))]
pub async fn recalculate(
    State(state): State<AppState>,
    tenant: Tenant,
    body: Result<Json<RecalculationRequest>, JsonRejection>,
) -> Result<Json<RecalculationReport>, ApiError> {
    let Json(request) = body?;
    let report = services(&state)?
        .recalculator
        .run(tenant.as_str(), &request)
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub refreshes: Vec<RefreshOutcome>,
}

/// `POST /v1/analytics/rollups/refresh`
#[tracing::instrument(name = "analytics.refresh", skip_all, fields(tenant = %tenant.as_str()))]
pub async fn refresh_rollups(
    State(state): State<AppState>,
    tenant: Tenant,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let Json(request) = body?;
    let refreshes = services(&state)?
        .analytics
        .refresh_rollups(tenant.as_str(), request.start, request.end)
        .await?;
    Ok(Json(RefreshResponse { refreshes }))
}

#[derive(Debug, Serialize)]
pub struct PricingRefreshResponse {
    pub models: usize,
}

/// `POST /v1/pricing/refresh`
#[tracing::instrument(name = "pricing.refresh_endpoint", skip(state))]
pub async fn refresh_pricing(
    State(state): State<AppState>,
) -> Result<Json<PricingRefreshResponse>, ApiError> {
    let models = state.pricing.refresh().await?;
    Ok(Json(PricingRefreshResponse { models }))
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use axum::{Router, body::Body, http::StatusCode};
    use chrono::{Duration, TimeZone, Utc};
    use http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::{AppState, build_app, config::AppConfig, db::test_utils::event};

    const PRICING: &str = r#"
[pricing.models.openai."gpt-4o"]
input_per_1m = 2.0
output_per_1m = 8.0
"#;

    async fn test_state() -> AppState {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let db_id = COUNTER.fetch_add(1, Ordering::SeqCst);

        let config_str = format!(
            r#"
[database]
type = "sqlite"
path = "file:test_analytics_db_{db_id}?mode=memory&cache=shared"
create_if_missing = true
run_migrations = true
wal_mode = false
busy_timeout_ms = 5000
{PRICING}"#
        );

        let config = AppConfig::from_str(&config_str).expect("Failed to parse test config");
        AppState::new(config).await.expect("Failed to create AppState")
    }

    fn app(state: &AppState) -> Router {
        build_app(&state.config, state.clone())
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    fn get(uri: &str, tenant: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(t) = tenant {
            builder = builder.header("x-tenant-id", t);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post(uri: &str, tenant: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("x-tenant-id", tenant)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn seed(state: &AppState) {
        let base = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
        let mut batch = Vec::new();
        for i in 0..6 {
            let mut e = event("acme", base + Duration::hours(i * 6), "gpt-4o", "openai");
            e.usage_input_tokens = 1_000_000;
            e.usage_output_tokens = 0;
            e.cost_total = 0.5;
            batch.push(e);
        }
        batch.push(event("other", base, "claude", "anthropic"));
        state
            .db
            .as_ref()
            .unwrap()
            .events()
            .insert_batch(&batch)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_usage_requires_tenant() {
        let state = test_state().await;
        let (status, body) = send(
            &app(&state),
            get("/v1/analytics/usage?start=2025-04-01T00:00:00Z&end=2025-04-02T00:00:00Z", None),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_error");
        assert!(body["error"]["request_id"].is_string());
    }

    #[tokio::test]
    async fn test_usage_groups_by_model() {
        let state = test_state().await;
        seed(&state).await;
        let app = app(&state);

        let (status, _) = send(
            &app,
            post(
                "/v1/analytics/rollups/refresh",
                "acme",
                json!({"start": "2025-04-01T00:00:00Z", "end": "2025-04-02T00:00:00Z"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // Day one from the rollup, the morning of day two from raw events.
        let (status, body) = send(
            &app,
            get(
                "/v1/analytics/usage?group_by=model&start=2025-04-01T00:00:00Z&end=2025-04-02T12:00:00Z",
                Some("acme"),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "continuous_aggregate");
        assert_eq!(body["total_groups"], 1);
        let row = &body["rows"][0];
        assert_eq!(row["model"], "gpt-4o");
        assert_eq!(row["request_count"], 6);
    }

    #[tokio::test]
    async fn test_usage_without_grouping_is_one_total() {
        let state = test_state().await;
        seed(&state).await;

        let (status, body) = send(
            &app(&state),
            get(
                "/v1/analytics/usage?start=2025-04-01T03:00:00Z&end=2025-04-01T20:00:00Z",
                Some("acme"),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "base_table");
        assert_eq!(body["rows"].as_array().unwrap().len(), 1);
        assert_eq!(body["rows"][0]["request_count"], 3);
    }

    #[tokio::test]
    async fn test_usage_rejects_unknown_column() {
        let state = test_state().await;
        let (status, body) = send(
            &app(&state),
            get(
                "/v1/analytics/usage?group_by=password&start=2025-04-01T00:00:00Z&end=2025-04-02T00:00:00Z",
                Some("acme"),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_error");
    }

    #[tokio::test]
    async fn test_usage_rejects_inverted_window() {
        let state = test_state().await;
        let (status, _) = send(
            &app(&state),
            get(
                "/v1/analytics/usage?start=2025-04-02T00:00:00Z&end=2025-04-01T00:00:00Z",
                Some("acme"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_usage_rejects_bad_timestamp() {
        let state = test_state().await;
        let (status, _) = send(
            &app(&state),
            get("/v1/analytics/usage?start=yesterday&end=today", Some("acme")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_summary_defaults_to_seven_days() {
        let state = test_state().await;
        let (status, body) = send(&app(&state), get("/v1/analytics/summary", Some("acme"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["days"], 7);
        assert_eq!(body["requests"]["current"], 0.0);
        assert_eq!(body["requests"]["change_pct"], 0.0);
    }

    #[tokio::test]
    async fn test_summary_rejects_zero_days() {
        let state = test_state().await;
        let (status, _) = send(&app(&state), get("/v1/analytics/summary?days=0", Some("acme"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_recalculate_reprices_and_reports() {
        let state = test_state().await;
        seed(&state).await;

        let (status, body) = send(
            &app(&state),
            post(
                "/v1/analytics/recalculate",
                "acme",
                json!({"start": "2025-04-01T00:00:00Z", "end": "2025-04-02T00:00:00Z"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["processed"], 5);
        assert_eq!(body["updated"], 5);
        assert_eq!(body["tenant_id"], "acme");

        // Same prices again: nothing moves.
        let (_, again) = send(
            &app(&state),
            post(
                "/v1/analytics/recalculate",
                "acme",
                json!({"start": "2025-04-01T00:00:00Z", "end": "2025-04-02T00:00:00Z"}),
            ),
        )
        .await;
        assert_eq!(again["updated"], 0);
    }

    #[tokio::test]
    async fn test_recalculate_rejects_malformed_body() {
        let state = test_state().await;
        let (status, body) = send(
            &app(&state),
            post("/v1/analytics/recalculate", "acme", json!({"start": "soon"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_error");
    }

    #[tokio::test]
    async fn test_refresh_rollups_reports_each_table() {
        let state = test_state().await;
        seed(&state).await;

        let (status, body) = send(
            &app(&state),
            post(
                "/v1/analytics/rollups/refresh",
                "acme",
                json!({"start": "2025-04-01T06:00:00Z", "end": "2025-04-02T06:00:00Z"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let refreshes = body["refreshes"].as_array().unwrap();
        assert_eq!(refreshes.len(), 3);
        for outcome in refreshes {
            assert_eq!(outcome["start"], "2025-04-01T00:00:00Z");
            assert_eq!(outcome["end"], "2025-04-03T00:00:00Z");
            assert!(outcome.get("error").is_none());
        }
    }

    #[tokio::test]
    async fn test_pricing_refresh_counts_models() {
        let state = test_state().await;
        let request = Request::builder()
            .method("POST")
            .uri("/v1/pricing/refresh")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app(&state), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["models"], 1);
    }
}

//! Health probes and the Prometheus exposition.

use std::time::Instant;

use axum::{Json, extract::State, response::IntoResponse};
use http::{StatusCode, header};
use serde::Serialize;

use crate::{AppState, db::DbPool, observability::metrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Overall {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: Overall,
    pub version: &'static str,
    pub subsystems: SubsystemStatus,
}

#[derive(Debug, Serialize)]
pub struct SubsystemStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<ComponentStatus>,
    /// Informational; an empty price table never fails the check.
    pub pricing: ComponentStatus,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

async fn probe_database(db: &DbPool) -> ComponentStatus {
    let started = Instant::now();
    let result = db.health_check().await;
    let latency_ms = started.elapsed().as_millis() as u64;
    if let Err(e) = &result {
        tracing::warn!(error = %e, "database health check failed");
    }
    ComponentStatus {
        healthy: result.is_ok(),
        message: result.err().map(|_| "database unreachable".to_string()),
        latency_ms: Some(latency_ms),
    }
}

/// `GET /health`: 503 when the database does not answer.
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.db.as_deref() {
        Some(db) => Some(probe_database(db).await),
        None => None,
    };

    let models = state.pricing.snapshot().len();
    let pricing = ComponentStatus {
        healthy: models > 0,
        message: Some(format!("{models} priced models")),
        latency_ms: None,
    };

    let status = match &database {
        Some(db) if !db.healthy => Overall::Unhealthy,
        _ => Overall::Healthy,
    };
    let code = match status {
        Overall::Healthy => StatusCode::OK,
        Overall::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        code,
        Json(HealthStatus {
            status,
            version: env!("CARGO_PKG_VERSION"),
            subsystems: SubsystemStatus { database, pricing },
        }),
    )
}

#[tracing::instrument(name = "health.liveness")]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Ready once the database answers, or immediately when none is configured.
#[tracing::instrument(name = "health.readiness", skip(state))]
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match &state.db {
        Some(db) if db.health_check().await.is_err() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    }
}

#[tracing::instrument(name = "health.metrics")]
pub async fn prometheus() -> impl IntoResponse {
    match metrics::render() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics recorder not installed".to_string(),
        ),
    }
}

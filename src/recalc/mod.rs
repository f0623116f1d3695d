//! Batched cost recalculation.
//!
//! Re-prices historical events after a pricing change, writing only rows
//! whose cost actually moved, then refreshes the rollups that depend on the
//! touched days. Runs are idempotent: a second run over the same range with
//! the same prices writes nothing.

mod context;
mod processor;

use std::sync::Arc;

use chrono::{DateTime, Utc};
pub use context::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    analytics::{AnalyticsError, RefreshOutcome},
    config::RecalculationConfig,
    db::{DbPool, EventRepo, LeaseRepo, RollupRepo},
    pricing::PricingLookup,
};

/// Run lifecycle. Reports only ever carry a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalculationStatus {
    Idle,
    Running,
    /// The whole range was processed
    Completed,
    /// The time budget ran out at a batch boundary
    PartialTimeout,
    /// The caller cancelled the run
    Cancelled,
    /// The lease was unavailable or a page could not be read
    Failed,
}

impl RecalculationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartialTimeout => "partial_timeout",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Idle | Self::Running)
    }

    /// Whether the run stopped before covering its whole range.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::PartialTimeout | Self::Cancelled)
    }
}

impl From<StopReason> for RecalculationStatus {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::Cancelled => Self::Cancelled,
            StopReason::TimedOut => Self::PartialTimeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Fetch,
    Write,
}

/// A batch that could not be read or written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchError {
    /// 0-based batch number
    pub batch: u32,
    pub offset: u64,
    pub phase: BatchPhase,
    /// Rows affected by the failure
    pub rows: usize,
    pub message: String,
}

/// Inclusive time range to reprice.
#[derive(Debug, Clone, Deserialize)]
pub struct RecalculationRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub batch_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecalculationReport {
    pub run_id: Uuid,
    pub tenant_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub batch_size: u32,
    pub status: RecalculationStatus,
    pub partial: bool,
    /// Rows read
    pub processed: u64,
    /// Rows whose cost was rewritten
    pub updated: u64,
    /// Rows left unchanged because no price is known for their model
    pub unpriced: u64,
    /// Non-empty batches processed
    pub batches: u32,
    pub errors: Vec<BatchError>,
    pub refreshes: Vec<RefreshOutcome>,
    /// Timestamp of the last row processed; everything in
    /// `[start, covered_until]` has been repriced
    pub covered_until: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    /// Why the run failed, when it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl RecalculationReport {
    fn new(run_id: Uuid, tenant_id: &str, request: &RecalculationRequest, batch_size: u32) -> Self {
        Self {
            run_id,
            tenant_id: tenant_id.to_string(),
            start: request.start,
            end: request.end,
            batch_size,
            status: RecalculationStatus::Idle,
            partial: false,
            processed: 0,
            updated: 0,
            unpriced: 0,
            batches: 0,
            errors: Vec::new(),
            refreshes: Vec::new(),
            covered_until: None,
            duration_ms: 0,
            failure: None,
        }
    }

    /// Completed, but some batch writes or rollup refreshes failed.
    pub fn has_warnings(&self) -> bool {
        !self.errors.is_empty() || self.refreshes.iter().any(|r| !r.is_ok())
    }
}

/// Reprices events for one tenant at a time.
pub struct CostRecalculator {
    events: Arc<dyn EventRepo>,
    rollups: Arc<dyn RollupRepo>,
    leases: Arc<dyn LeaseRepo>,
    pricing: Arc<dyn PricingLookup>,
    config: RecalculationConfig,
}

impl CostRecalculator {
    pub fn new(
        events: Arc<dyn EventRepo>,
        rollups: Arc<dyn RollupRepo>,
        leases: Arc<dyn LeaseRepo>,
        pricing: Arc<dyn PricingLookup>,
        config: RecalculationConfig,
    ) -> Self {
        Self {
            events,
            rollups,
            leases,
            pricing,
            config,
        }
    }

    pub fn from_db(db: &DbPool, pricing: Arc<dyn PricingLookup>, config: RecalculationConfig) -> Self {
        Self::new(db.events(), db.rollups(), db.leases(), pricing, config)
    }

    pub fn config(&self) -> &RecalculationConfig {
        &self.config
    }

    /// Run with the configured time budget and no external cancellation.
    pub async fn run(
        &self,
        tenant_id: &str,
        request: &RecalculationRequest,
    ) -> Result<RecalculationReport, AnalyticsError> {
        let ctx = RunContext::with_budget(self.config.time_budget());
        self.run_with(tenant_id, request, &ctx).await
    }

    fn validate(&self, request: &RecalculationRequest) -> Result<u32, AnalyticsError> {
        if request.start > request.end {
            return Err(AnalyticsError::validation("start must not be after end"));
        }
        let batch_size = request.batch_size.unwrap_or(self.config.batch_size);
        if batch_size == 0 || batch_size > self.config.max_batch_size {
            return Err(AnalyticsError::validation(format!(
                "batch_size must be between 1 and {}",
                self.config.max_batch_size
            )));
        }
        Ok(batch_size)
    }
}

/// Lease key serializing runs for one tenant.
pub fn lease_key(tenant_id: &str) -> String {
    format!("recalc:{tenant_id}")
}

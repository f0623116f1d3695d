use std::time::Instant;

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    BatchError, BatchPhase, CostRecalculator, RecalculationReport, RecalculationRequest,
    RecalculationStatus, RunContext, lease_key,
};
use crate::{
    analytics::{AnalyticsError, refresh_variants, touched_days},
    models::CostUpdate,
    observability::metrics,
};

/// Where the batch loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running { offset: u64, batch: u32 },
    Finished(RecalculationStatus),
}

/// What one batch did.
enum BatchStep {
    /// The page was empty; the range is exhausted
    Exhausted,
    Processed,
    /// The page could not be read
    FetchFailed,
}

impl CostRecalculator {
    /// Run until the range is exhausted, `ctx` fires, or a page fetch fails.
    ///
    /// Never returns `Err` for run-time failures; those end up in the report.
    #[instrument(
        skip(self, request, ctx),
        fields(start = %request.start, end = %request.end, run_id = tracing::field::Empty),
        err
    )]
    pub async fn run_with(
        &self,
        tenant_id: &str,
        request: &RecalculationRequest,
        ctx: &RunContext,
    ) -> Result<RecalculationReport, AnalyticsError> {
        let batch_size = self.validate(request)?;
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let key = lease_key(tenant_id);
        let holder = run_id.to_string();
        let mut report = RecalculationReport::new(run_id, tenant_id, request, batch_size);

        let mut state = RunState::Idle;
        let status = loop {
            state = match state {
                RunState::Idle => match self.leases.try_acquire(&key, &holder, self.config.lease_ttl()).await {
                    Ok(true) => {
                        info!(tenant_id, batch_size, "Cost recalculation started");
                        RunState::Running { offset: 0, batch: 0 }
                    }
                    Ok(false) => {
                        warn!(tenant_id, "Another recalculation holds the tenant lease");
                        report.failure = Some("another recalculation is running for this tenant".into());
                        report.status = RecalculationStatus::Failed;
                        report.duration_ms = started.elapsed().as_millis() as u64;
                        metrics::record_recalculation_run(report.status.as_str(), 0, 0, 0);
                        return Ok(report);
                    }
                    Err(e) => {
                        error!(tenant_id, error = %e, "Failed to acquire recalculation lease");
                        report.failure = Some(format!("lease unavailable: {e}"));
                        report.status = RecalculationStatus::Failed;
                        report.duration_ms = started.elapsed().as_millis() as u64;
                        metrics::record_recalculation_run(report.status.as_str(), 0, 0, 0);
                        return Ok(report);
                    }
                },
                RunState::Running { offset, batch } => {
                    if let Some(reason) = ctx.stop_reason() {
                        info!(tenant_id, batch, ?reason, "Stopping recalculation at batch boundary");
                        RunState::Finished(reason.into())
                    } else {
                        match self
                            .process_batch(tenant_id, request, batch_size, offset, batch, &mut report)
                            .await
                        {
                            BatchStep::Exhausted => RunState::Finished(RecalculationStatus::Completed),
                            BatchStep::FetchFailed => RunState::Finished(RecalculationStatus::Failed),
                            BatchStep::Processed => RunState::Running {
                                offset: offset + u64::from(batch_size),
                                batch: batch + 1,
                            },
                        }
                    }
                }
                RunState::Finished(status) => break status,
            };
        };

        report.status = status;
        report.partial = status.is_partial();

        // Completed runs refresh the whole requested range; anything else only
        // what it actually got through.
        let refresh_until = match status {
            RecalculationStatus::Completed => Some(request.end),
            _ => report.covered_until,
        };
        if let Some(until) = refresh_until {
            let days = touched_days(request.start, until);
            report.refreshes = refresh_variants(self.rollups.as_ref(), tenant_id, days).await;
        }

        if let Err(e) = self.leases.release(&key, &holder).await {
            warn!(tenant_id, error = %e, "Failed to release recalculation lease; it will expire");
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        metrics::record_recalculation_run(
            status.as_str(),
            report.processed,
            report.updated,
            report.unpriced,
        );
        info!(
            tenant_id,
            status = status.as_str(),
            processed = report.processed,
            updated = report.updated,
            unpriced = report.unpriced,
            batches = report.batches,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "Cost recalculation finished"
        );

        Ok(report)
    }

    async fn process_batch(
        &self,
        tenant_id: &str,
        request: &RecalculationRequest,
        batch_size: u32,
        offset: u64,
        batch: u32,
        report: &mut RecalculationReport,
    ) -> BatchStep {
        let rows = match self
            .events
            .fetch_cost_rows(tenant_id, request.start, request.end, offset, batch_size)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(tenant_id, batch, offset, error = %e, "Failed to fetch recalculation batch");
                metrics::record_recalculation_batch_error("fetch");
                report.failure = Some(format!("batch {batch} could not be read: {e}"));
                report.errors.push(BatchError {
                    batch,
                    offset,
                    phase: BatchPhase::Fetch,
                    rows: 0,
                    message: e.to_string(),
                });
                return BatchStep::FetchFailed;
            }
        };

        let Some(last) = rows.last() else {
            return BatchStep::Exhausted;
        };
        let last_timestamp = last.key.timestamp;

        let mut updates = Vec::new();
        for row in &rows {
            let Some(cost) = self.pricing.cost(
                &row.model,
                &row.provider,
                row.usage_input_tokens,
                row.usage_output_tokens,
                row.usage_cached_tokens,
            ) else {
                report.unpriced += 1;
                continue;
            };
            if (cost.total - row.cost_total).abs() > self.config.epsilon {
                updates.push(CostUpdate {
                    key: row.key.clone(),
                    cost_total: cost.total,
                });
            }
        }

        if !updates.is_empty() {
            match self.events.update_costs(tenant_id, &updates).await {
                Ok(changed) => report.updated += changed,
                Err(e) => {
                    warn!(
                        tenant_id,
                        batch,
                        offset,
                        rows = updates.len(),
                        error = %e,
                        "Failed to write recalculated costs; continuing"
                    );
                    metrics::record_recalculation_batch_error("write");
                    report.errors.push(BatchError {
                        batch,
                        offset,
                        phase: BatchPhase::Write,
                        rows: updates.len(),
                        message: e.to_string(),
                    });
                }
            }
        }

        report.processed += rows.len() as u64;
        report.batches += 1;
        report.covered_until = Some(last_timestamp);
        tracing::debug!(
            tenant_id,
            batch,
            offset,
            rows = rows.len(),
            updates = updates.len(),
            "Recalculation batch processed"
        );

        BatchStep::Processed
    }
}

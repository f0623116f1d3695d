//! Prometheus metrics.
//!
//! The public recording functions are the same with or without the
//! `prometheus` feature; without it they do nothing.

use crate::config::MetricsConfig;

pub use recorder::*;

#[cfg(feature = "prometheus")]
mod recorder {
    use std::sync::OnceLock;

    use metrics::{counter, histogram};
    use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

    use super::{MetricsConfig, MetricsError};

    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

    /// Install the global recorder. Does nothing when metrics are disabled.
    pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
        if !config.enabled {
            return Ok(());
        }
        if HANDLE.get().is_some() {
            return Err(MetricsError::AlreadyInstalled);
        }

        let seconds: Vec<f64> = config
            .latency_buckets_ms
            .iter()
            .map(|ms| ms / 1000.0)
            .collect();
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Suffix("_duration_seconds".into()), &seconds)?
            .install_recorder()?;
        HANDLE
            .set(handle)
            .map_err(|_| MetricsError::AlreadyInstalled)
    }

    pub fn render() -> Option<String> {
        HANDLE.get().map(PrometheusHandle::render)
    }

    pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
        let method = method.to_string();
        let path = path.to_string();
        counter!(
            "http_requests_total",
            "method" => method.clone(),
            "path" => path.clone(),
            "status_class" => format!("{}xx", status / 100)
        )
        .increment(1);
        histogram!("http_request_duration_seconds", "method" => method, "path" => path)
            .record(duration_secs);
    }

    /// `source` is the store that answered: raw events, a rollup, or both.
    pub fn record_analytics_query(source: &str, duration_secs: f64) {
        let source = source.to_string();
        counter!("analytics_queries_total", "source" => source.clone()).increment(1);
        histogram!("analytics_query_duration_seconds", "source" => source).record(duration_secs);
    }

    /// A rollup could not be read and the query was answered from raw events.
    pub fn record_rollup_fallback(table: &str) {
        counter!("analytics_rollup_fallbacks_total", "table" => table.to_string()).increment(1);
    }

    pub fn record_rollup_refresh(table: &str, success: bool) {
        counter!(
            "rollup_refreshes_total",
            "table" => table.to_string(),
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);
    }

    pub fn record_recalculation_run(status: &str, processed: u64, updated: u64, unpriced: u64) {
        counter!("recalculation_runs_total", "status" => status.to_string()).increment(1);
        counter!("recalculation_rows_processed_total").increment(processed);
        counter!("recalculation_rows_updated_total").increment(updated);
        counter!("recalculation_rows_unpriced_total").increment(unpriced);
    }

    /// `phase` is `fetch` or `write`.
    pub fn record_recalculation_batch_error(phase: &str) {
        counter!("recalculation_batch_errors_total", "phase" => phase.to_string()).increment(1);
    }
}

#[cfg(not(feature = "prometheus"))]
mod recorder {
    use super::{MetricsConfig, MetricsError};

    pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
        Ok(())
    }

    pub fn render() -> Option<String> {
        None
    }

    pub fn record_http_request(_method: &str, _path: &str, _status: u16, _duration_secs: f64) {}

    pub fn record_analytics_query(_source: &str, _duration_secs: f64) {}

    pub fn record_rollup_fallback(_table: &str) {}

    pub fn record_rollup_refresh(_table: &str, _success: bool) {}

    pub fn record_recalculation_run(_status: &str, _processed: u64, _updated: u64, _unpriced: u64) {
    }

    pub fn record_recalculation_batch_error(_phase: &str) {}
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics recorder already installed")]
    AlreadyInstalled,

    #[cfg(feature = "prometheus")]
    #[error("failed to build Prometheus recorder: {0}")]
    Build(#[from] metrics_exporter_prometheus::BuildError),
}

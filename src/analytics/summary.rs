use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::instrument;

use super::{AnalyticsError, AnalyticsService};
use crate::{db::TimeRange, models::WindowStats};

/// Longest comparison period, in days.
pub const MAX_SUMMARY_DAYS: u32 = 365;

/// Percent change from `previous` to `current`.
///
/// With no previous value any growth reads as 100% and no activity as 0%.
pub fn percent_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        if current > 0.0 { 100.0 } else { 0.0 }
    } else {
        (current - previous) / previous * 100.0
    }
}

/// `numerator / denominator`, or 0 when the denominator is 0.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricChange {
    pub current: f64,
    pub previous: f64,
    pub change_pct: f64,
}

impl MetricChange {
    pub fn new(current: f64, previous: f64) -> Self {
        Self {
            current,
            previous,
            change_pct: percent_change(current, previous),
        }
    }

    fn from_stats(current: &WindowStats, previous: &WindowStats, f: impl Fn(&WindowStats) -> f64) -> Self {
        Self::new(f(current), f(previous))
    }
}

/// Current period compared against the equally long period before it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub days: u32,
    pub current_start: DateTime<Utc>,
    pub current_end: DateTime<Utc>,
    pub previous_start: DateTime<Utc>,
    pub previous_end: DateTime<Utc>,

    pub requests: MetricChange,
    pub total_cost: MetricChange,
    pub input_tokens: MetricChange,
    pub output_tokens: MetricChange,
    pub cached_tokens: MetricChange,
    pub total_tokens: MetricChange,
    pub unique_traces: MetricChange,
    pub unique_users: MetricChange,
    pub streaming_requests: MetricChange,
    pub tool_calls: MetricChange,
    pub errors: MetricChange,

    pub avg_latency_ms: MetricChange,
    pub p50_latency_ms: MetricChange,
    pub p95_latency_ms: MetricChange,
    pub p99_latency_ms: MetricChange,

    /// Cached share of input tokens, in percent
    pub cache_hit_rate_pct: MetricChange,
    /// Streaming share of requests, in percent
    pub streaming_rate_pct: MetricChange,
    /// Failed share of requests, in percent
    pub error_rate_pct: MetricChange,
    pub calls_per_trace: MetricChange,
    pub cost_per_1k_tokens: MetricChange,
}

impl PeriodSummary {
    fn build(days: u32, current_range: TimeRange, previous_range: TimeRange, cur: &WindowStats, prev: &WindowStats) -> Self {
        let m = |f: fn(&WindowStats) -> f64| MetricChange::from_stats(cur, prev, f);

        Self {
            days,
            current_start: current_range.start,
            current_end: current_range.end,
            previous_start: previous_range.start,
            previous_end: previous_range.end,

            requests: m(|s| s.request_count as f64),
            total_cost: m(|s| s.total_cost),
            input_tokens: m(|s| s.input_tokens as f64),
            output_tokens: m(|s| s.output_tokens as f64),
            cached_tokens: m(|s| s.cached_tokens as f64),
            total_tokens: m(|s| s.total_tokens as f64),
            unique_traces: m(|s| s.unique_traces as f64),
            unique_users: m(|s| s.unique_users as f64),
            streaming_requests: m(|s| s.streaming_count as f64),
            tool_calls: m(|s| s.tool_call_count as f64),
            errors: m(|s| s.error_count as f64),

            avg_latency_ms: m(|s| s.avg_latency_ms),
            p50_latency_ms: m(|s| s.p50_latency_ms),
            p95_latency_ms: m(|s| s.p95_latency_ms),
            p99_latency_ms: m(|s| s.p99_latency_ms),

            cache_hit_rate_pct: m(|s| safe_ratio(s.cached_tokens as f64, s.input_tokens as f64) * 100.0),
            streaming_rate_pct: m(|s| safe_ratio(s.streaming_count as f64, s.request_count as f64) * 100.0),
            error_rate_pct: m(|s| safe_ratio(s.error_count as f64, s.request_count as f64) * 100.0),
            calls_per_trace: m(|s| safe_ratio(s.request_count as f64, s.unique_traces as f64)),
            cost_per_1k_tokens: m(|s| safe_ratio(s.total_cost, s.total_tokens as f64) * 1000.0),
        }
    }
}

impl AnalyticsService {
    /// Compare the last `days` days against the `days` before them.
    pub async fn period_summary(&self, tenant_id: &str, days: u32) -> Result<PeriodSummary, AnalyticsError> {
        self.period_summary_at(tenant_id, days, Utc::now()).await
    }

    /// [`Self::period_summary`] with an explicit "now".
    #[instrument(skip(self), err)]
    pub async fn period_summary_at(
        &self,
        tenant_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<PeriodSummary, AnalyticsError> {
        if !(1..=MAX_SUMMARY_DAYS).contains(&days) {
            return Err(AnalyticsError::validation(format!(
                "days must be between 1 and {MAX_SUMMARY_DAYS}"
            )));
        }

        let span = Duration::days(i64::from(days));
        let current = TimeRange::new(now - span, now);
        let previous = TimeRange::new(now - span - span, now - span);

        let (cur, prev) = futures::try_join!(
            self.events.window_stats(tenant_id, current),
            self.events.window_stats(tenant_id, previous),
        )?;

        Ok(PeriodSummary::build(days, current, previous, &cur, &prev))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;
    use crate::{
        config::QueryConfig,
        db::test_utils::{MemoryEventRepo, MemoryRollupRepo, event},
    };

    #[rstest]
    #[case::growth(150.0, 100.0, 50.0)]
    #[case::decline(50.0, 100.0, -50.0)]
    #[case::flat(10.0, 10.0, 0.0)]
    #[case::from_zero(5.0, 0.0, 100.0)]
    #[case::both_zero(0.0, 0.0, 0.0)]
    #[case::to_zero(0.0, 8.0, -100.0)]
    fn test_percent_change(#[case] current: f64, #[case] previous: f64, #[case] expected: f64) {
        assert!((percent_change(current, previous) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_safe_ratio_zero_denominator() {
        assert_eq!(safe_ratio(5.0, 0.0), 0.0);
        assert_eq!(safe_ratio(6.0, 3.0), 2.0);
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn service(events: Arc<MemoryEventRepo>) -> AnalyticsService {
        let rollups = Arc::new(MemoryRollupRepo::new(events.clone()));
        AnalyticsService::new(events, rollups, QueryConfig::default())
    }

    #[tokio::test]
    async fn test_summary_compares_adjacent_windows() {
        let events = Arc::new(MemoryEventRepo::new());
        let mut batch = Vec::new();

        // Current window: 4 calls over 2 traces, one streamed, one failed.
        for (i, hours_ago) in [1, 2, 3, 4].into_iter().enumerate() {
            let mut e = event("t1", now() - Duration::hours(hours_ago), "gpt-4o", "openai");
            e.trace_id = format!("cur-{}", i % 2);
            e.usage_input_tokens = 1000;
            e.usage_cached_tokens = 250;
            e.usage_output_tokens = 0;
            e.cost_total = 1.0;
            e.latency_ms = 100 * (i as i64 + 1);
            e.stream = i == 0;
            e.user_id = Some(format!("u{i}"));
            if i == 3 {
                e.finish_reason = Some("error".into());
            }
            batch.push(e);
        }
        // Previous window: 2 calls.
        for hours_ago in [30, 40] {
            let mut e = event("t1", now() - Duration::hours(hours_ago), "gpt-4o", "openai");
            e.usage_input_tokens = 1000;
            e.usage_output_tokens = 0;
            e.cost_total = 1.0;
            batch.push(e);
        }
        // Exactly `now` is outside the current window.
        batch.push(event("t1", now(), "gpt-4o", "openai"));
        events.insert(batch);

        let summary = service(events).period_summary_at("t1", 1, now()).await.unwrap();

        assert_eq!(summary.current_end, now());
        assert_eq!(summary.previous_end, summary.current_start);
        assert_eq!(summary.requests, MetricChange::new(4.0, 2.0));
        assert!((summary.requests.change_pct - 100.0).abs() < 1e-9);
        assert!((summary.total_cost.current - 4.0).abs() < 1e-9);
        assert_eq!(summary.unique_traces.current, 2.0);
        assert_eq!(summary.unique_users.current, 4.0);
        assert_eq!(summary.unique_users.previous, 0.0);
        assert!((summary.cache_hit_rate_pct.current - 25.0).abs() < 1e-9);
        assert!((summary.streaming_rate_pct.current - 25.0).abs() < 1e-9);
        assert!((summary.error_rate_pct.current - 25.0).abs() < 1e-9);
        assert!((summary.calls_per_trace.current - 2.0).abs() < 1e-9);
        assert!((summary.cost_per_1k_tokens.current - 1.0).abs() < 1e-9);
        // latencies 100..400, nearest rank
        assert_eq!(summary.p50_latency_ms.current, 200.0);
        assert_eq!(summary.p95_latency_ms.current, 400.0);
        assert!((summary.avg_latency_ms.current - 250.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_summary_empty_tenant_is_all_zero() {
        let summary = service(Arc::new(MemoryEventRepo::new()))
            .period_summary_at("nobody", 7, now())
            .await
            .unwrap();
        assert_eq!(summary.requests, MetricChange::new(0.0, 0.0));
        assert_eq!(summary.requests.change_pct, 0.0);
        assert_eq!(summary.cache_hit_rate_pct.current, 0.0);
        assert_eq!(summary.calls_per_trace.current, 0.0);
    }

    #[rstest]
    #[case(0)]
    #[case(366)]
    #[tokio::test]
    async fn test_summary_days_bounds(#[case] days: u32) {
        let err = service(Arc::new(MemoryEventRepo::new()))
            .period_summary_at("t1", days, now())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Validation(_)));
    }
}

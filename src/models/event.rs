use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single LLM call as recorded by the ingestion path.
///
/// Rows are immutable apart from `cost_total`, which only the cost
/// recalculation job rewrites. Costs are USD as `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub tenant_id: String,
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    /// Position of the call within its trace; part of the natural key
    pub call_sequence: i32,
    pub model: String,
    pub provider: String,
    pub agent: Option<String>,
    /// End user the call was made for, when the caller supplied one
    pub user_id: Option<String>,
    pub usage_input_tokens: i64,
    pub usage_output_tokens: i64,
    /// Prompt tokens served from the provider's cache (subset of input tokens)
    pub usage_cached_tokens: i64,
    /// Provider-reported total; derived from input + output when absent
    pub usage_total_tokens: Option<i64>,
    pub cost_total: f64,
    pub latency_ms: i64,
    /// How the generation ended (stop, length, tool_calls, error, ...)
    pub finish_reason: Option<String>,
    pub tool_call_count: i32,
    pub stream: bool,
}

impl UsageEvent {
    pub fn total_tokens(&self) -> i64 {
        self.usage_total_tokens
            .unwrap_or(self.usage_input_tokens + self.usage_output_tokens)
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            timestamp: self.timestamp,
            trace_id: self.trace_id.clone(),
            call_sequence: self.call_sequence,
        }
    }
}

/// Natural composite key of an event within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    pub call_sequence: i32,
}

/// The columns the recalculation job needs to reprice one event.
#[derive(Debug, Clone, PartialEq)]
pub struct CostRow {
    pub key: EventKey,
    pub model: String,
    pub provider: String,
    pub usage_input_tokens: i64,
    pub usage_output_tokens: i64,
    pub usage_cached_tokens: i64,
    pub cost_total: f64,
}

/// A new `cost_total` for the event identified by `key`.
#[derive(Debug, Clone, PartialEq)]
pub struct CostUpdate {
    pub key: EventKey,
    pub cost_total: f64,
}

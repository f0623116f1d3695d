use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Limits applied to grouped analytics queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    /// Page size when the caller gives none.
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// Largest page a caller may request.
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,

    /// Largest offset a caller may request.
    #[serde(default = "default_max_offset")]
    pub max_offset: u64,

    /// Longest query window, in days.
    #[serde(default = "default_max_window_days")]
    pub max_window_days: i64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            max_offset: default_max_offset(),
            max_window_days: default_max_window_days(),
        }
    }
}

impl QueryConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.max_limit == 0 {
            return Err(ConfigError::Validation(
                "query.max_limit must be at least 1".into(),
            ));
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(ConfigError::Validation(format!(
                "query.default_limit must be between 1 and query.max_limit ({})",
                self.max_limit
            )));
        }
        if self.max_window_days < 1 {
            return Err(ConfigError::Validation(
                "query.max_window_days must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_limit() -> u32 {
    100
}

fn default_max_limit() -> u32 {
    1000
}

fn default_max_offset() -> u64 {
    100_000
}

fn default_max_window_days() -> i64 {
    366
}

/// Cost recalculation job settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecalculationConfig {
    /// Rows per batch when the caller gives none.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Upper bound on a caller-supplied batch size.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u32,

    /// Wall-clock budget for one run. The run stops at the first batch
    /// boundary after this elapses and reports partial completion.
    #[serde(default = "default_time_budget")]
    pub time_budget_secs: u64,

    /// Cost differences at or below this many USD are not written.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    /// How long a run's tenant lease lives before another run may take it.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
}

impl Default for RecalculationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_batch_size: default_max_batch_size(),
            time_budget_secs: default_time_budget(),
            epsilon: default_epsilon(),
            lease_ttl_secs: default_lease_ttl(),
        }
    }
}

impl RecalculationConfig {
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.batch_size > self.max_batch_size {
            return Err(ConfigError::Validation(format!(
                "recalculation.batch_size must be between 1 and recalculation.max_batch_size ({})",
                self.max_batch_size
            )));
        }
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(ConfigError::Validation(
                "recalculation.epsilon must be a non-negative number".into(),
            ));
        }
        // The lease also covers the rollup refresh that runs after the
        // budget expires, so it needs headroom past the budget itself.
        if self.lease_ttl_secs < self.time_budget_secs.saturating_mul(LEASE_HEADROOM) {
            return Err(ConfigError::Validation(format!(
                "recalculation.lease_ttl_secs must be at least {LEASE_HEADROOM}x recalculation.time_budget_secs"
            )));
        }
        Ok(())
    }
}

/// Minimum ratio of lease TTL to run budget.
const LEASE_HEADROOM: u64 = 2;

fn default_batch_size() -> u32 {
    1000
}

fn default_max_batch_size() -> u32 {
    5000
}

fn default_time_budget() -> u64 {
    300
}

fn default_epsilon() -> f64 {
    1e-6
}

fn default_lease_ttl() -> u64 {
    900
}

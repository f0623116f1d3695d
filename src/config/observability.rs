use serde::{Deserialize, Serialize};

/// `[observability]`: log output and the Prometheus endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// ```toml
/// [observability.logging]
/// level = "debug"
/// format = "json"
/// filter = "sqlx=info"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    /// Emit source file and line with each event.
    #[serde(default)]
    pub file_line: bool,

    /// Extra `EnvFilter` directives appended after the level.
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// The bare `EnvFilter` directive for this level.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    /// One JSON object per line, with the current span attached
    Json,
}

/// ```toml
/// [observability.metrics]
/// enabled = true
/// path = "/metrics"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Requires the `prometheus` feature.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_path")]
    pub path: String,

    /// Bucket bounds in milliseconds for every `*_duration_seconds` histogram.
    #[serde(default = "default_latency_buckets")]
    pub latency_buckets_ms: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_metrics_path(),
            latency_buckets_ms: default_latency_buckets(),
        }
    }
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

// Analytics queries sit in the tens of milliseconds; recalculation batches
// and rollup refreshes can take seconds.
fn default_latency_buckets() -> Vec<f64> {
    vec![
        5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 10_000.0, 30_000.0,
    ]
}

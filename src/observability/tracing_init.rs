//! Global subscriber setup.

use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingConfig, ObservabilityConfig};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level and filter.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), TracingError> {
    let logging = &config.logging;

    let fmt = tracing_subscriber::fmt::layer()
        .with_file(logging.file_line)
        .with_line_number(logging.file_line);
    let output: Box<dyn Layer<Registry> + Send + Sync> = match logging.format {
        LogFormat::Pretty => fmt.pretty().boxed(),
        LogFormat::Compact => fmt.compact().boxed(),
        LogFormat::Json => fmt.json().with_current_span(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(env_filter(logging))
        .try_init()
        .map_err(|e| TracingError::Init(e.to_string()))
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    let level = config.level.directive();
    let fallback = || EnvFilter::new(level);

    match (std::env::var("RUST_LOG"), &config.filter) {
        (Ok(directives), _) => EnvFilter::try_new(directives).unwrap_or_else(|_| fallback()),
        (Err(_), Some(extra)) => {
            EnvFilter::try_new(format!("{level},{extra}")).unwrap_or_else(|_| fallback())
        }
        // Connection-level crates are noisy at info.
        (Err(_), None) => EnvFilter::new(format!("{level},hyper=warn,h2=warn,sqlx=warn")),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}

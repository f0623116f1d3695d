use std::{path::PathBuf, process::ExitCode};

use chrono::{DateTime, Utc};
use clap::Parser;
use meterline::{
    AppState, build_app,
    config::AppConfig,
    db::DbPool,
    observability::{init_tracing, metrics},
    recalc::{RecalculationRequest, RunContext},
};
use tokio_util::sync::CancellationToken;

/// Usage analytics and cost recalculation for LLM events
#[derive(Parser, Debug)]
#[command(version, about = "Meterline usage analytics", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file. Without one, built-in defaults apply (no database).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the HTTP server (default)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Reprice stored events for one tenant and print the report
    Recalculate {
        #[arg(long)]
        tenant: String,
        /// First timestamp to reprice (RFC 3339)
        #[arg(long)]
        start: DateTime<Utc>,
        /// Last timestamp to reprice, inclusive (RFC 3339)
        #[arg(long)]
        end: DateTime<Utc>,
        #[arg(long)]
        batch_size: Option<u32>,
    },
    /// Rematerialize daily rollups for the days overlapping [start, end)
    Refresh {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long)]
        end: DateTime<Utc>,
    },
    /// Print the period-over-period summary for one tenant
    Summary {
        #[arg(long)]
        tenant: String,
        #[arg(long, default_value = "7")]
        days: u32,
    },
}

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(&config.observability) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    let result = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => migrate(&config).await,
        Command::Recalculate {
            tenant,
            start,
            end,
            batch_size,
        } => {
            let request = RecalculationRequest {
                start,
                end,
                batch_size,
            };
            recalculate(config, &tenant, request).await
        }
        Command::Refresh { tenant, start, end } => refresh(config, &tenant, start, end).await,
        Command::Summary { tenant, days } => summary(config, &tenant, days).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig, BoxError> {
    match path {
        Some(path) => Ok(AppConfig::from_file(path)?),
        None => Ok(AppConfig::default()),
    }
}

async fn serve(config: AppConfig) -> Result<(), BoxError> {
    metrics::init_metrics(&config.observability.metrics)?;

    let state = AppState::new(config.clone()).await?;
    let app = build_app(&config, state);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(CancellationToken::new()))
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn migrate(config: &AppConfig) -> Result<(), BoxError> {
    let pool = DbPool::connect(&config.database).await?;
    pool.run_migrations().await?;
    tracing::info!("migrations complete");
    Ok(())
}

/// Services for one-shot commands; these require a database.
async fn services(config: AppConfig) -> Result<meterline::services::Services, BoxError> {
    let state = AppState::new(config).await?;
    state
        .services
        .ok_or_else(|| "this command requires a configured database".into())
}

async fn recalculate(
    config: AppConfig,
    tenant: &str,
    request: RecalculationRequest,
) -> Result<(), BoxError> {
    let budget = config.recalculation.time_budget();
    let services = services(config).await?;

    // Ctrl+C stops the run at the next batch boundary; the partial report
    // is still printed.
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));
    let ctx = RunContext::new(cancel, budget);

    let report = services
        .recalculator
        .run_with(tenant, &request, &ctx)
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.status == meterline::recalc::RecalculationStatus::Failed {
        return Err(report
            .failure
            .unwrap_or_else(|| "recalculation failed".to_string())
            .into());
    }
    Ok(())
}

async fn refresh(
    config: AppConfig,
    tenant: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), BoxError> {
    let services = services(config).await?;
    let outcomes = services.analytics.refresh_rollups(tenant, start, end).await?;
    println!("{}", serde_json::to_string_pretty(&outcomes)?);

    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    if failed > 0 {
        return Err(format!("{failed} rollup table(s) failed to refresh").into());
    }
    Ok(())
}

async fn summary(config: AppConfig, tenant: &str, days: u32) -> Result<(), BoxError> {
    let services = services(config).await?;
    let summary = services.analytics.period_summary(tenant, days).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Resolves on SIGINT or SIGTERM, cancelling `cancel` first.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
    cancel.cancel();
}

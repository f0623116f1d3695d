//! Storage: connection pools plus one repository per table family.
//!
//! Callers only see the `*Repo` traits; which backend sits behind them is
//! decided once, in [`DbPool::connect`].

mod error;
#[cfg(feature = "database-postgres")]
pub mod postgres;
pub mod repos;
#[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
mod sql;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(test)]
pub mod test_utils;
#[cfg(all(test, any(feature = "database-sqlite", feature = "database-postgres")))]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

enum Backend {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    /// Primary, plus the replica analytics reads go to when configured.
    #[cfg(feature = "database-postgres")]
    Postgres {
        primary: sqlx::PgPool,
        replica: Option<sqlx::PgPool>,
    },
    #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
    _Unreachable(std::convert::Infallible),
}

pub struct DbPool {
    backend: Backend,
    events: Arc<dyn EventRepo>,
    rollups: Arc<dyn RollupRepo>,
    leases: Arc<dyn LeaseRepo>,
    pricing: Arc<dyn PricingRepo>,
}

impl DbPool {
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        Self {
            events: Arc::new(sqlite::SqliteEventRepo::new(pool.clone())),
            rollups: Arc::new(sqlite::SqliteRollupRepo::new(pool.clone())),
            leases: Arc::new(sqlite::SqliteLeaseRepo::new(pool.clone())),
            pricing: Arc::new(sqlite::SqlitePricingRepo::new(pool.clone())),
            backend: Backend::Sqlite(pool),
        }
    }

    #[cfg(feature = "database-postgres")]
    pub fn from_postgres(primary: sqlx::PgPool, replica: Option<sqlx::PgPool>) -> Self {
        Self {
            events: Arc::new(postgres::PostgresEventRepo::new(
                primary.clone(),
                replica.clone(),
            )),
            rollups: Arc::new(postgres::PostgresRollupRepo::new(
                primary.clone(),
                replica.clone(),
            )),
            // Leases are read-modify-write; a replica would hand out stale holders.
            leases: Arc::new(postgres::PostgresLeaseRepo::new(primary.clone())),
            pricing: Arc::new(postgres::PostgresPricingRepo::new(
                primary.clone(),
                replica.clone(),
            )),
            backend: Backend::Postgres { primary, replica },
        }
    }

    /// Open the pool described by `[database]`.
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => connect_sqlite(cfg).await.map(Self::from_sqlite),
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(cfg) => {
                let (primary, replica) = connect_postgres(cfg).await?;
                Ok(Self::from_postgres(primary, replica))
            }
        }
    }

    /// Apply the embedded migrations. Postgres migrates the primary only.
    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.backend {
            #[cfg(feature = "database-sqlite")]
            Backend::Sqlite(pool) => {
                sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
                tracing::info!(backend = "sqlite", "migrations applied");
            }
            #[cfg(feature = "database-postgres")]
            Backend::Postgres { primary, .. } => {
                sqlx::migrate!("./migrations_sqlx/postgres")
                    .run(primary)
                    .await?;
                tracing::info!(backend = "postgres", "migrations applied");
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            Backend::_Unreachable(never) => match *never {},
        }
        Ok(())
    }

    pub fn events(&self) -> Arc<dyn EventRepo> {
        Arc::clone(&self.events)
    }

    pub fn rollups(&self) -> Arc<dyn RollupRepo> {
        Arc::clone(&self.rollups)
    }

    pub fn leases(&self) -> Arc<dyn LeaseRepo> {
        Arc::clone(&self.leases)
    }

    pub fn pricing(&self) -> Arc<dyn PricingRepo> {
        Arc::clone(&self.pricing)
    }

    /// Round-trip a trivial query on every pool this instance holds.
    pub async fn health_check(&self) -> DbResult<()> {
        match &self.backend {
            #[cfg(feature = "database-sqlite")]
            Backend::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            #[cfg(feature = "database-postgres")]
            Backend::Postgres { primary, replica } => {
                sqlx::query("SELECT 1").execute(primary).await?;
                if let Some(replica) = replica {
                    sqlx::query("SELECT 1").execute(replica).await?;
                }
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            Backend::_Unreachable(never) => match *never {},
        }
        Ok(())
    }
}

#[cfg(feature = "database-sqlite")]
async fn connect_sqlite(cfg: &crate::config::SqliteConfig) -> DbResult<sqlx::SqlitePool> {
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

    let journal = if cfg.wal_mode {
        SqliteJournalMode::Wal
    } else {
        SqliteJournalMode::Delete
    };
    let options = SqliteConnectOptions::new()
        .filename(&cfg.path)
        .create_if_missing(cfg.create_if_missing)
        .journal_mode(journal)
        .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.max_connections)
        .connect_with(options)
        .await?;
    tracing::debug!(path = %cfg.path, "opened sqlite pool");
    Ok(pool)
}

#[cfg(feature = "database-postgres")]
async fn connect_postgres(
    cfg: &crate::config::PostgresConfig,
) -> DbResult<(sqlx::PgPool, Option<sqlx::PgPool>)> {
    use std::time::Duration;

    let pool_options = || {
        sqlx::postgres::PgPoolOptions::new()
            .min_connections(cfg.min_connections)
            .max_connections(cfg.max_connections)
            .acquire_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(cfg.idle_timeout_secs))
    };

    let primary = pool_options().connect(&cfg.url).await?;
    let replica = match &cfg.read_url {
        Some(url) => {
            tracing::info!("analytics reads will use the configured replica");
            Some(pool_options().connect(url).await?)
        }
        None => None,
    };
    Ok((primary, replica))
}

use thiserror::Error;

/// Errors from the storage layer.
///
/// Routes map `Validation` to 400 and `NotConfigured` to 503; everything else
/// surfaces as an opaque 500.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("no database configured")]
    NotConfigured,

    #[error("invalid input: {0}")]
    Validation(String),

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    Internal(String),
}

pub type DbResult<T> = Result<T, DbError>;

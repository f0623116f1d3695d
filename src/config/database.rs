use serde::{Deserialize, Serialize};

use super::ConfigError;

/// `[database]`: where events, rollups, the pricing catalog and
/// recalculation leases live.
///
/// ```toml
/// [database]
/// type = "postgres"
/// url = "postgres://meterline@db/meterline"
/// read_url = "postgres://meterline@replica/meterline"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum DatabaseConfig {
    /// Health probes still answer; every analytics route returns 503.
    #[default]
    None,

    #[cfg(feature = "database-sqlite")]
    Sqlite(SqliteConfig),

    #[cfg(feature = "database-postgres")]
    Postgres(PostgresConfig),
}

impl DatabaseConfig {
    pub fn is_none(&self) -> bool {
        matches!(self, DatabaseConfig::None)
    }

    pub fn run_migrations(&self) -> bool {
        match self {
            DatabaseConfig::None => false,
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(c) => c.run_migrations,
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(c) => c.run_migrations,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let problem = match self {
            DatabaseConfig::None => None,
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(c) if c.path.trim().is_empty() => {
                Some("database.path must not be empty")
            }
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(c) if c.max_connections == 0 => {
                Some("database.max_connections must be at least 1")
            }
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(c) if c.url.trim().is_empty() => {
                Some("database.url must not be empty")
            }
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(c) if c.min_connections > c.max_connections => {
                Some("database.min_connections exceeds database.max_connections")
            }
            #[allow(unreachable_patterns)]
            _ => None,
        };
        match problem {
            Some(msg) => Err(ConfigError::Validation(msg.into())),
            None => Ok(()),
        }
    }
}

#[cfg(feature = "database-sqlite")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteConfig {
    /// File path, or `:memory:` for a throwaway database.
    pub path: String,

    #[serde(default = "enabled")]
    pub create_if_missing: bool,

    #[serde(default = "enabled")]
    pub run_migrations: bool,

    /// Lets analytics reads proceed while a rollup refresh is writing.
    #[serde(default = "enabled")]
    pub wal_mode: bool,

    #[serde(default = "SqliteConfig::default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "SqliteConfig::default_max_connections")]
    pub max_connections: u32,
}

#[cfg(feature = "database-sqlite")]
impl SqliteConfig {
    fn default_busy_timeout_ms() -> u64 {
        5_000
    }

    fn default_max_connections() -> u32 {
        5
    }
}

#[cfg(feature = "database-postgres")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostgresConfig {
    /// Primary. Recalculation, rollup refreshes, leases and migrations
    /// always go here.
    pub url: String,

    /// Replica for analytics reads.
    #[serde(default)]
    pub read_url: Option<String>,

    #[serde(default = "PostgresConfig::default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "PostgresConfig::default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "PostgresConfig::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "PostgresConfig::default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "enabled")]
    pub run_migrations: bool,
}

#[cfg(feature = "database-postgres")]
impl PostgresConfig {
    fn default_min_connections() -> u32 {
        1
    }

    fn default_max_connections() -> u32 {
        20
    }

    fn default_connect_timeout_secs() -> u64 {
        10
    }

    fn default_idle_timeout_secs() -> u64 {
        300
    }
}

#[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
fn enabled() -> bool {
    true
}

//! Migrated pools for the shared repository tests.
//!
//! SQLite pools are private in-memory databases. PostgreSQL pools share one
//! container per test binary and get a fresh schema each.

#[cfg(feature = "database-sqlite")]
use sqlx::SqlitePool;

/// A single-connection in-memory SQLite database with the schema applied.
///
/// One connection, because every `sqlite::memory:` connection opens its own
/// empty database.
#[cfg(feature = "database-sqlite")]
pub async fn migrated_sqlite_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory SQLite pool");
    sqlx::migrate!("./migrations_sqlx/sqlite")
        .run(&pool)
        .await
        .expect("SQLite migrations");
    pool
}

#[cfg(all(test, feature = "database-postgres"))]
pub mod postgres {
    use std::sync::OnceLock;

    use sqlx::{PgPool, postgres::PgPoolOptions};
    use testcontainers_modules::{
        postgres::Postgres,
        testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner},
    };
    use tokio::sync::OnceCell;

    struct Server {
        // Dropping the handle stops the container.
        _container: ContainerAsync<Postgres>,
        url: String,
    }

    static SERVER: OnceLock<OnceCell<Server>> = OnceLock::new();

    async fn server() -> &'static Server {
        SERVER
            .get_or_init(OnceCell::new)
            .get_or_init(|| async {
                let container = Postgres::default()
                    .with_tag("18-alpine")
                    .start()
                    .await
                    .expect("PostgreSQL container");
                let host = container.get_host().await.expect("container host");
                let port = container
                    .get_host_port_ipv4(5432)
                    .await
                    .expect("container port");

                Server {
                    url: format!("postgres://postgres:postgres@{host}:{port}/postgres"),
                    _container: container,
                }
            })
            .await
    }

    /// A pool bound to a new schema with the migrations applied.
    pub async fn migrated_postgres_pool() -> PgPool {
        let server = server().await;
        let schema = format!("t_{}", uuid::Uuid::new_v4().simple());

        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&server.url)
            .await
            .expect("admin connection");
        sqlx::query(&format!("CREATE SCHEMA \"{schema}\""))
            .execute(&admin)
            .await
            .expect("test schema");
        admin.close().await;

        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&format!("{}?options=-c search_path={schema}", server.url))
            .await
            .expect("schema-scoped pool");
        sqlx::migrate!("./migrations_sqlx/postgres")
            .run(&pool)
            .await
            .expect("PostgreSQL migrations");
        pool
    }
}

//! Database pool and migrations

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

/// Maximum connections per process. Supabase's pooler caps connections per
/// role, and every worker/api replica shares that budget.
const MAX_CONNECTIONS: u32 = 10;

/// Connection attempts made at startup before giving up.
const CONNECT_ATTEMPTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database connection failed: {0}")]
    Connect(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Create the shared connection pool.
///
/// The hosted database is occasionally slow to accept connections right after
/// a deploy, so the initial connect is retried with exponential backoff.
pub async fn create_pool(database_url: &str) -> Result<PgPool, DbError> {
    let strategy = ExponentialBackoff::from_millis(10)
        .max_delay(Duration::from_secs(5))
        .map(jitter)
        .take(CONNECT_ATTEMPTS - 1);

    let pool = Retry::spawn(strategy, || async {
        PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Database connection attempt failed");
                e
            })
    })
    .await?;

    Ok(pool)
}

/// Apply the embedded migrations under `crates/shared/migrations`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

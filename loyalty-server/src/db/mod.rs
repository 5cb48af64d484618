//! Database module
//!
//! PostgreSQL pool, the retry executor and the ledger units of work.

pub mod ledger;
pub mod retry;

pub use ledger::{Ledger, OrderOwner};
pub use retry::{RetryPolicy, TxRunner, UnitOfWork, with_backoff};

use crate::config::Config;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Connect to PostgreSQL and apply embedded migrations
pub async fn connect(config: &Config) -> Result<PgPool, BoxError> {
    tracing::info!(
        max_connections = config.database_max_connections,
        "Connecting to database"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

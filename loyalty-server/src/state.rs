//! Application state

use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::auth::{JwtConfig, JwtService};
use crate::config::Config;
use crate::db::{self, Ledger, TxRunner};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL connection pool
    pub pool: PgPool,
    /// Ledger store, every call goes through the retry executor
    pub ledger: Ledger,
    pub jwt: Arc<JwtService>,
}

impl AppState {
    /// Connect, migrate and build state bound to the shared lifetime
    pub async fn new(config: &Config, shutdown: CancellationToken) -> Result<Self, BoxError> {
        let pool = db::connect(config).await?;
        let jwt = JwtService::with_config(JwtConfig::new(
            config.jwt_secret.clone(),
            config.jwt_expiration_minutes,
        ));
        Ok(Self::from_parts(pool, jwt, shutdown))
    }

    pub fn from_parts(pool: PgPool, jwt: JwtService, shutdown: CancellationToken) -> Self {
        let ledger = Ledger::new(TxRunner::new(pool.clone(), shutdown));
        Self {
            pool,
            ledger,
            jwt: Arc::new(jwt),
        }
    }
}

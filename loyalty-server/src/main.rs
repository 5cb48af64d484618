//! loyalty-server binary
//!
//! Loads configuration, connects to PostgreSQL, starts the accrual pipeline
//! and serves the HTTP API until Ctrl-C / SIGTERM.

use anyhow::Context;
use loyalty_server::accrual::{self, AccrualClient};
use loyalty_server::core::BackgroundTasks;
use loyalty_server::utils::logger::init_logger_with_file;
use loyalty_server::{AppState, Config, api};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    init_logger_with_file(
        Some(&config.log_level),
        config.log_json,
        config.log_dir.as_deref(),
    );

    tracing::info!(
        env = %config.environment,
        address = %config.run_address,
        "Starting loyalty-server"
    );
    if config.environment == "development" && std::env::var("JWT_SECRET").is_err() {
        tracing::warn!("JWT_SECRET not set, using a random key; tokens will not survive a restart");
    }

    let mut tasks = BackgroundTasks::new();
    let shutdown = tasks.shutdown_token();

    let state = AppState::new(&config, shutdown.clone())
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to initialize application state")?;

    let client = AccrualClient::new(&config.accrual.base_url, config.accrual.request_timeout)
        .context("failed to build accrual client")?;
    accrual::start_pipeline(
        Arc::new(state.ledger.clone()),
        client,
        &config.accrual,
        &mut tasks,
    );
    tasks.log_summary();

    let app = api::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&config.run_address)
        .await
        .with_context(|| format!("failed to bind {}", config.run_address))?;
    tracing::info!("loyalty-server HTTP listening on {}", config.run_address);

    tokio::spawn(watch_signals(shutdown.clone()));

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned());
    if let Err(e) = server.await {
        tracing::error!("HTTP server error: {e}");
    }

    tasks.shutdown().await;
    state.pool.close().await;
    tracing::info!("loyalty-server stopped");

    Ok(())
}

/// Cancel the shared lifetime on Ctrl-C or SIGTERM
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => return,
    }

    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}

//! HTTP API (gophermart-compatible)

pub mod balance;
pub mod health;
pub mod orders;
pub mod user;

use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use shared::error::AppError;
use tower_http::trace::TraceLayer;

pub type ApiResult<T> = Result<axum::Json<T>, AppError>;

/// Create the combined router
pub fn create_router(state: AppState) -> Router {
    // Public: registration and login
    let public = Router::new()
        .route("/api/user/register", post(user::register))
        .route("/api/user/login", post(user::login));

    // Bearer token required (enforced by the CurrentUser extractor)
    let protected = Router::new()
        .route(
            "/api/user/orders",
            post(orders::upload_order).get(orders::list_orders),
        )
        .route("/api/user/balance", get(balance::get_balance))
        .route("/api/user/balance/withdraw", post(balance::withdraw))
        .route("/api/user/withdrawals", get(balance::list_withdrawals));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

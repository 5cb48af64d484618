//! Balance, withdrawals

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use shared::error::{AppError, AppResult, ErrorCode};
use shared::models::{Balance, WithdrawRequest};

use super::ApiResult;
use crate::auth::CurrentUser;
use crate::state::AppState;

/// GET /api/user/balance
pub async fn get_balance(State(state): State<AppState>, user: CurrentUser) -> ApiResult<Balance> {
    Ok(Json(state.ledger.get_balance(&user.login).await?))
}

/// POST /api/user/balance/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<WithdrawRequest>, JsonRejection>,
) -> AppResult<StatusCode> {
    let Json(req) = payload.map_err(|e| AppError::invalid_request(e.body_text()))?;
    let order = req.order.trim();

    // Any malformed number is unprocessable here, not only a bad checksum
    if !shared::luhn::is_valid(order) {
        return Err(AppError::new(ErrorCode::OrderNumberInvalid));
    }
    if !req.sum.is_positive() {
        return Err(AppError::new(ErrorCode::InvalidAmount));
    }

    state.ledger.withdraw(&user.login, order, req.sum).await?;
    tracing::info!(login = %user.login, order = %order, sum = %req.sum, "Points withdrawn");
    Ok(StatusCode::OK)
}

/// GET /api/user/withdrawals
pub async fn list_withdrawals(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Response> {
    let withdrawals = state.ledger.get_withdrawals(&user.login).await?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(withdrawals).into_response())
}
